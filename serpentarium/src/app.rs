use crate::channel::{ControlChannel, MessageListener};
use crate::config::AppConfig;
use crate::simulation::{GenerationEnded, TICK_INTERVAL, World};
use anyhow::Result;
use shared::{GenerationAnnounce, Message, MessageType};
use std::cell::RefCell;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// Collects lifecycle messages during the channel pump. The app acts on them
/// afterwards, from its own loop, where it is free to send replies.
#[derive(Default)]
struct Inbox {
    lifecycle: Vec<Message>,
}

impl MessageListener for Inbox {
    fn on_message(&mut self, message: &Message) {
        match message.kind {
            MessageType::Start | MessageType::Resume | MessageType::Generation => {
                self.lifecycle.push(message.clone());
            }
            // ACK/ERROR/DATA are the world's concern.
            _ => {}
        }
    }
}

/// Ties the pieces together: one control channel, one world, one fixed-rate
/// loop that pumps, reacts and steps.
pub struct App {
    channel: Rc<RefCell<ControlChannel>>,
    world: Rc<RefCell<World>>,
    inbox: Rc<RefCell<Inbox>>,
    resume: bool,
    generations_completed: u32,
}

impl App {
    pub fn new(config: AppConfig) -> Result<Self> {
        let channel = ControlChannel::connect(
            &config.simulation.socket_path,
            config.simulation.connect_retries,
        )?;
        let mut app = Self::with_channel(channel, &config);

        if config.simulation.auto_start || config.resume {
            app.send_hello();
        }
        Ok(app)
    }

    fn with_channel(channel: ControlChannel, config: &AppConfig) -> Self {
        let channel = Rc::new(RefCell::new(channel));
        let world = Rc::new(RefCell::new(World::new(channel.clone(), &config.simulation)));
        world.borrow_mut().populate();
        let inbox = Rc::new(RefCell::new(Inbox::default()));

        let as_listener: Rc<RefCell<dyn MessageListener>> = world.clone();
        channel.borrow_mut().register_listener(&as_listener);
        let as_listener: Rc<RefCell<dyn MessageListener>> = inbox.clone();
        channel.borrow_mut().register_listener(&as_listener);

        Self {
            channel,
            world,
            inbox,
            resume: config.resume,
            generations_completed: 0,
        }
    }

    /// Announce ourselves with the population roster. START asks the trainer
    /// to begin from scratch; RESUME rejoins a session already in progress.
    fn send_hello(&mut self) {
        let kind = if self.resume {
            MessageType::Resume
        } else {
            MessageType::Start
        };
        let roster = serde_json::to_value(self.world.borrow().roster()).unwrap_or_default();
        self.channel.borrow_mut().send(kind, Some(roster));
    }

    /// The main loop: pump the channel, act on lifecycle traffic, advance the
    /// world one tick, sleep off the rest of the frame. Returns only once
    /// nothing can ever happen again.
    pub fn run(&mut self) -> Result<()> {
        let mut last_status = Instant::now();
        loop {
            let frame_start = Instant::now();

            ControlChannel::pump(&self.channel);
            self.process_lifecycle();

            let ended = self.world.borrow_mut().step(TICK_INTERVAL);
            if let Some(ended) = ended {
                self.report_generation(&ended);
            }

            if last_status.elapsed() >= STATUS_INTERVAL {
                self.log_status();
                last_status = Instant::now();
            }

            if !self.channel.borrow().is_open() && !self.world.borrow().is_running() {
                anyhow::bail!(
                    "control channel closed and simulation halted after {} generation(s)",
                    self.generations_completed
                );
            }

            if let Some(rest) =
                Duration::from_secs_f32(TICK_INTERVAL).checked_sub(frame_start.elapsed())
            {
                thread::sleep(rest);
            }
        }
    }

    fn process_lifecycle(&mut self) {
        let messages = std::mem::take(&mut self.inbox.borrow_mut().lifecycle);
        for message in messages {
            match message.kind {
                // START opens the session, GENERATION announces the next
                // round; both launch a fresh generation here.
                MessageType::Start | MessageType::Generation => {
                    let generation = message
                        .data_as::<GenerationAnnounce>()
                        .map(|announce| announce.generation)
                        .unwrap_or_else(|| self.world.borrow().generation() + 1);
                    let mut world = self.world.borrow_mut();
                    world.prepare_generation(generation);
                    world.begin();
                }
                MessageType::Resume => {
                    log::info!("predictor acknowledged the resumed session");
                }
                _ => {}
            }
        }
    }

    fn report_generation(&mut self, ended: &GenerationEnded) {
        self.generations_completed += 1;
        log::info!(
            "generation {} finished ({:?}) with {} champion(s)",
            ended.generation,
            ended.reason,
            ended.champions.len()
        );
        let report = serde_json::to_value(self.world.borrow().generation_report())
            .unwrap_or_default();
        self.channel
            .borrow_mut()
            .send(MessageType::Generation, Some(report));
    }

    fn log_status(&self) {
        let status = self.world.borrow().status();
        let channel = self.channel.borrow();
        log::info!(
            "gen {} tick {}: {}/{} alive, {} food, trainer progress {:.0}%, {} request(s) in flight, recent rtt {:.1?}ms",
            status.generation,
            status.tick,
            status.alive,
            status.total,
            status.foods,
            status.progress * 100.0,
            status.pending,
            channel.last_round_trips(5),
        );
        if !channel.is_open() {
            log::warn!("control channel is closed; simulation is running blind");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use serde_json::json;
    use shared::{FrameReader, write_frame};
    use std::io::Read;
    use std::os::unix::net::UnixListener;

    fn small_config() -> AppConfig {
        AppConfig {
            simulation: SimulationConfig {
                snake_count: 2,
                snake_length: 2,
                food_spawn_probability: 0.0,
                ..SimulationConfig::default()
            },
            resume: false,
        }
    }

    #[test]
    fn inbox_keeps_only_lifecycle_messages() {
        let mut inbox = Inbox::default();
        for kind in [
            MessageType::Start,
            MessageType::Ack,
            MessageType::Data,
            MessageType::Generation,
            MessageType::Error,
            MessageType::Resume,
        ] {
            inbox.on_message(&Message::new(kind, None));
        }
        let kinds: Vec<_> = inbox.lifecycle.iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![MessageType::Start, MessageType::Generation, MessageType::Resume]
        );
    }

    #[test]
    fn start_message_launches_the_announced_generation() {
        let mut app = App::with_channel(ControlChannel::disconnected(), &small_config());
        app.inbox.borrow_mut().lifecycle.push(Message {
            message_id: Some(1),
            kind: MessageType::Start,
            data: Some(json!({ "generation": 3 })),
        });

        app.process_lifecycle();
        assert_eq!(app.world.borrow().generation(), 3);
        assert!(app.world.borrow().is_running());
    }

    #[test]
    fn start_without_payload_advances_the_generation_counter() {
        let mut app = App::with_channel(ControlChannel::disconnected(), &small_config());
        app.inbox
            .borrow_mut()
            .lifecycle
            .push(Message::new(MessageType::Start, None));

        app.process_lifecycle();
        assert_eq!(app.world.borrow().generation(), 1);
    }

    #[test]
    fn finished_generation_is_counted_and_reported() {
        let mut app = App::with_channel(ControlChannel::disconnected(), &small_config());
        app.world.borrow_mut().begin();
        let ended = GenerationEnded {
            reason: crate::simulation::EndReason::TimeLimit,
            generation: 4,
            champions: Vec::new(),
        };
        app.report_generation(&ended);
        assert_eq!(app.generations_completed, 1);
    }

    #[test]
    fn handshake_over_a_real_socket() {
        let dir = std::env::temp_dir().join(format!("serpentarium-app-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("control.sock");
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = FrameReader::new();
            let mut buf = [0u8; 4096];
            let hello = loop {
                if let Some(frame) = reader.next_frame() {
                    break frame.unwrap();
                }
                let n = stream.read(&mut buf).unwrap();
                assert!(n > 0, "client hung up before the hello");
                reader.extend(&buf[..n]);
            };
            assert_eq!(hello.kind, MessageType::Start);
            let reply = Message {
                message_id: hello.message_id,
                kind: MessageType::Start,
                data: Some(json!({ "generation": 1 })),
            };
            write_frame(&mut stream, &reply).unwrap();
            // Give the client time to drain the reply before dropping.
            thread::sleep(Duration::from_millis(200));
        });

        let mut config = small_config();
        config.simulation.socket_path = path;
        config.simulation.connect_retries = 5;
        let mut app = App::new(config).unwrap();

        let mut launched = false;
        for _ in 0..50 {
            ControlChannel::pump(&app.channel);
            app.process_lifecycle();
            if app.world.borrow().generation() == 1 && app.world.borrow().is_running() {
                launched = true;
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(launched, "START handshake never completed");
        server.join().unwrap();
    }
}
