pub mod framing;
pub mod message;

pub use framing::{FrameError, FrameReader, write_frame, MAX_FRAME_LEN};
pub use message::{
    GenerationAnnounce, GenerationReport, Message, MessageId, MessageType, Prediction,
    ReportedSnake, SnakeRoster, SnakeState, SnakeSummary,
};
