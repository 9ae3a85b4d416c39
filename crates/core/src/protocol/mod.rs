//! Wire protocol: JSON text messages and the binary audio frame

pub mod codec;
pub mod frame;

pub use codec::{InboundMessage, MessageCodec, HEARTBEAT_PAYLOAD};
pub use frame::{Frame, FrameCodec};
