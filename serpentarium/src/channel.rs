use anyhow::{Context, Result};
use serde_json::Value;
use shared::{FrameReader, Message, MessageId, MessageType, write_frame};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::{ErrorKind, Read};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::rc::{Rc, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// How many delay samples to keep for the status readout.
const DELAY_SAMPLE_CAP: usize = 256;

pub type ListenerId = u32;

/// Receives every inbound protocol message, synchronously, during `pump`.
///
/// Listeners must not call back into the channel from `on_message`; replies
/// belong in the caller's loop after the pump completes.
pub trait MessageListener {
    fn on_message(&mut self, message: &Message);
}

/// The single control connection to the external predictor.
///
/// Constructed once at process start and passed to whoever needs it. Sends
/// never block the simulation tick; inbound frames are drained by `pump` from
/// the same single-threaded loop. There is no automatic reconnect: once the
/// peer goes away the simulation stalls visibly.
pub struct ControlChannel {
    stream: Option<UnixStream>,
    reader: FrameReader,
    next_message_id: MessageId,
    listeners: Vec<(ListenerId, Weak<RefCell<dyn MessageListener>>)>,
    next_listener_id: ListenerId,
    sent_at: HashMap<MessageId, Instant>,
    last_sent_at: Option<Instant>,
    send_gaps_ms: VecDeque<f32>,
    round_trips_ms: VecDeque<f32>,
}

impl ControlChannel {
    /// A channel with no transport. Sends are counted but not transmitted.
    pub fn disconnected() -> Self {
        Self {
            stream: None,
            reader: FrameReader::new(),
            next_message_id: 0,
            listeners: Vec::new(),
            next_listener_id: 0,
            sent_at: HashMap::new(),
            last_sent_at: None,
            send_gaps_ms: VecDeque::new(),
            round_trips_ms: VecDeque::new(),
        }
    }

    /// Connect to the predictor socket, waiting for the socket file to show
    /// up (the peer may still be starting).
    pub fn connect(path: &Path, retries: u32) -> Result<Self> {
        let mut remaining = retries;
        let stream = loop {
            match UnixStream::connect(path) {
                Ok(stream) => break stream,
                Err(e) => {
                    remaining = remaining.saturating_sub(1);
                    if remaining == 0 {
                        return Err(e).with_context(|| {
                            format!("failed to connect to predictor socket {}", path.display())
                        });
                    }
                }
            }
            thread::sleep(Duration::from_millis(100));
        };
        stream
            .set_nonblocking(true)
            .context("failed to make control socket non-blocking")?;
        log::info!("connected to predictor at {}", path.display());

        let mut channel = Self::disconnected();
        channel.stream = Some(stream);
        Ok(channel)
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Stamp the next sequence id onto the message and transmit it if the
    /// channel is open. The id is always assigned and returned, even when
    /// nothing goes on the wire, so pending-request bookkeeping stays
    /// consistent with the sequence numbering.
    pub fn send(&mut self, kind: MessageType, data: Option<Value>) -> MessageId {
        let message_id = self.next_message_id;
        self.next_message_id += 1;

        let now = Instant::now();
        if let Some(previous) = self.last_sent_at.replace(now) {
            push_sample(&mut self.send_gaps_ms, previous.elapsed().as_secs_f32() * 1000.0);
        }
        self.sent_at.insert(message_id, now);

        if let Some(stream) = self.stream.as_mut() {
            let message = Message {
                message_id: Some(message_id),
                kind,
                data,
            };
            if let Err(e) = write_frame(stream, &message) {
                log::warn!("send failed ({e}); control channel closed, simulation will stall");
                self.stream = None;
            }
        }

        message_id
    }

    /// Read whatever the peer has sent, then fan each message out to all
    /// registered listeners before returning.
    pub fn pump(channel: &Rc<RefCell<Self>>) {
        let (messages, listeners) = {
            let mut this = channel.borrow_mut();
            this.read_available();
            let messages = this.drain_frames();
            this.listeners.retain(|(_, weak)| weak.strong_count() > 0);
            (messages, this.listeners.clone())
        };

        // The channel borrow is released here: listeners are free to inspect
        // their own state, and a re-entrant send would be caught loudly.
        for message in &messages {
            for (_, weak) in &listeners {
                if let Some(listener) = weak.upgrade() {
                    listener.borrow_mut().on_message(message);
                }
            }
        }
    }

    pub fn register_listener(&mut self, listener: &Rc<RefCell<dyn MessageListener>>) -> ListenerId {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.push((id, Rc::downgrade(listener)));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) {
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
    }

    /// Wall-clock gaps between the last `n` consecutive sends, in ms.
    pub fn last_send_gaps(&self, n: usize) -> Vec<f32> {
        self.send_gaps_ms.iter().rev().take(n).rev().copied().collect()
    }

    /// Send-to-matching-receive delays for the last `n` correlated replies.
    pub fn last_round_trips(&self, n: usize) -> Vec<f32> {
        self.round_trips_ms.iter().rev().take(n).rev().copied().collect()
    }

    fn read_available(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    log::warn!("predictor closed the connection; simulation will stall");
                    self.stream = None;
                    return;
                }
                Ok(n) => self.reader.extend(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    log::warn!("read failed ({e}); control channel closed");
                    self.stream = None;
                    return;
                }
            }
        }
    }

    fn drain_frames(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(frame) = self.reader.next_frame() {
            match frame {
                Ok(message) => {
                    self.record_receipt(&message);
                    messages.push(message);
                }
                Err(e) => log::warn!("dropping inbound frame: {e}"),
            }
        }
        messages
    }

    fn record_receipt(&mut self, message: &Message) {
        if let Some(id) = message.message_id {
            if let Some(sent) = self.sent_at.remove(&id) {
                push_sample(&mut self.round_trips_ms, sent.elapsed().as_secs_f32() * 1000.0);
            }
        }
    }
}

fn push_sample(samples: &mut VecDeque<f32>, value: f32) {
    if samples.len() == DELAY_SAMPLE_CAP {
        samples.pop_front();
    }
    samples.push_back(value);
}
