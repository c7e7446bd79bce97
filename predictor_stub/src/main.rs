use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Value, json};
use shared::{FrameReader, Message, MessageType, write_frame};
use std::collections::HashMap;
use std::io::Read;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;

/// Stand-in predictor for local runs: speaks the control protocol and
/// steers every snake with random vectors. Useful for exercising the
/// sandbox without a real trainer.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Socket to listen on.
    #[arg(long, default_value = "/tmp/serpentarium/control.sock")]
    socket: PathBuf,

    /// Seed for the random steering.
    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Largest steering component, in pixels per tick.
    #[arg(long, default_value_t = 3.0)]
    max_speed: f32,
}

struct Stub {
    rng: StdRng,
    max_speed: f32,
    generation: u32,
}

impl Stub {
    fn respond(&mut self, request: &Message) -> Message {
        let (kind, data) = match request.kind {
            MessageType::Start | MessageType::Resume => {
                log::info!("session opened at generation {}", self.generation);
                (
                    MessageType::Start,
                    Some(json!({ "generation": self.generation })),
                )
            }
            MessageType::Generation => {
                self.generation += 1;
                log::info!("round reported, announcing generation {}", self.generation);
                (
                    MessageType::Generation,
                    Some(json!({ "generation": self.generation })),
                )
            }
            MessageType::Data => (MessageType::Data, Some(self.random_steering(request))),
            MessageType::Ack | MessageType::Error => (MessageType::Ack, None),
        };
        Message {
            message_id: request.message_id,
            kind,
            data,
        }
    }

    /// One random vector per snake in the snapshot, plus a made-up progress.
    fn random_steering(&mut self, request: &Message) -> Value {
        let snapshot: HashMap<String, Value> = request.data_as().unwrap_or_default();
        let mut prediction = HashMap::new();
        for id in snapshot.keys() {
            let vx = (self.rng.gen::<f32>() * 2.0 - 1.0) * self.max_speed;
            let vy = (self.rng.gen::<f32>() * 2.0 - 1.0) * self.max_speed;
            prediction.insert(id.clone(), [vx, vy]);
        }
        json!({ "prediction": prediction, "progress": self.rng.gen::<f32>() })
    }
}

fn serve(stream: &mut UnixStream, stub: &mut Stub) -> Result<()> {
    let mut reader = FrameReader::new();
    let mut buf = [0u8; 4096];
    loop {
        while let Some(frame) = reader.next_frame() {
            let request = frame.context("malformed frame")?;
            let reply = stub.respond(&request);
            write_frame(stream, &reply).context("failed to write reply")?;
        }
        let n = stream.read(&mut buf).context("read failed")?;
        if n == 0 {
            log::info!("client disconnected");
            return Ok(());
        }
        reader.extend(&buf[..n]);
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Some(parent) = cli.socket.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    // A stale socket file from a previous run would make bind fail.
    let _ = std::fs::remove_file(&cli.socket);
    let listener = UnixListener::bind(&cli.socket)
        .with_context(|| format!("failed to bind {}", cli.socket.display()))?;
    log::info!("listening on {}", cli.socket.display());

    let mut stub = Stub {
        rng: StdRng::seed_from_u64(cli.seed),
        max_speed: cli.max_speed,
        generation: 1,
    };
    loop {
        let (mut stream, _) = listener.accept().context("accept failed")?;
        log::info!("client connected");
        if let Err(e) = serve(&mut stream, &mut stub) {
            log::warn!("session ended: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub() -> Stub {
        Stub {
            rng: StdRng::seed_from_u64(1),
            max_speed: 3.0,
            generation: 1,
        }
    }

    #[test]
    fn start_is_answered_with_the_current_generation() {
        let mut stub = stub();
        let reply = stub.respond(&Message {
            message_id: Some(5),
            kind: MessageType::Start,
            data: None,
        });
        assert_eq!(reply.message_id, Some(5));
        assert_eq!(reply.kind, MessageType::Start);
        assert_eq!(reply.data.unwrap()["generation"], 1);
    }

    #[test]
    fn generation_report_advances_the_counter() {
        let mut stub = stub();
        let reply = stub.respond(&Message::new(MessageType::Generation, None));
        assert_eq!(reply.data.unwrap()["generation"], 2);
        let reply = stub.respond(&Message::new(MessageType::Generation, None));
        assert_eq!(reply.data.unwrap()["generation"], 3);
    }

    #[test]
    fn data_gets_one_vector_per_snake() {
        let mut stub = stub();
        let reply = stub.respond(&Message {
            message_id: Some(1),
            kind: MessageType::Data,
            data: Some(json!({ "676": {}, "687": {} })),
        });
        let data = reply.data.unwrap();
        let prediction = data["prediction"].as_object().unwrap();
        assert_eq!(prediction.len(), 2);
        assert!(prediction.contains_key("676"));
        for vector in prediction.values() {
            let v = vector.as_array().unwrap();
            assert!(v[0].as_f64().unwrap().abs() <= 3.0);
            assert!(v[1].as_f64().unwrap().abs() <= 3.0);
        }
    }
}
