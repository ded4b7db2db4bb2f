#![forbid(unsafe_code)]

pub mod framing;
pub mod stt;

pub use framing::{CLIENT_FRAME_TYPE, FRAME_HEADER_LEN, FramingError, encode_frame, encode_frame_into, split_frames};
pub use stt::{Record, Value, decode, encode};
