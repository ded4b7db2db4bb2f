#![forbid(unsafe_code)]

//! Outbound packet framer and inbound frame splitter.
//!
//! Client-originated packets carry a fixed 12-byte header: the declared
//! length (payload length + 9) as little-endian `u32`, written twice, then
//! the client frame-type tag. The gateway delivers inbound traffic as blobs
//! whose payloads are NUL-delimited; header bytes land in short segments that
//! the noise threshold discards.

use bytes::BytesMut;
use thiserror::Error;

/// Frame-type tag for client-originated control/keepalive packets.
pub const CLIENT_FRAME_TYPE: u32 = 689;

/// Fixed header size: declared length twice plus the type tag.
pub const FRAME_HEADER_LEN: usize = 12;

/// The declared length covers the type tag and trailing protocol bytes in
/// addition to the payload.
const LENGTH_OVERHEAD: u32 = 9;

/// Inbound segments at or below this many characters are protocol preambles
/// or keepalive echoes and never reach the dispatcher.
pub const NOISE_THRESHOLD_CHARS: usize = 12;

#[derive(Debug, Error)]
pub enum FramingError {
	#[error("frame payload exceeds wire limit: len={len}")]
	PayloadTooLarge { len: usize },
}

/// Encode `text` into a framed client packet.
pub fn encode_frame(text: &str) -> Result<Vec<u8>, FramingError> {
	let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + text.len());
	encode_frame_into(&mut buf, text)?;
	Ok(buf.to_vec())
}

/// Append a framed client packet into the provided buffer.
pub fn encode_frame_into(buf: &mut BytesMut, text: &str) -> Result<(), FramingError> {
	let payload = text.as_bytes();
	let declared = u32::try_from(payload.len())
		.ok()
		.and_then(|len| len.checked_add(LENGTH_OVERHEAD))
		.ok_or(FramingError::PayloadTooLarge { len: payload.len() })?;

	buf.reserve(FRAME_HEADER_LEN + payload.len());
	buf.extend_from_slice(&declared.to_le_bytes());
	buf.extend_from_slice(&declared.to_le_bytes());
	buf.extend_from_slice(&CLIENT_FRAME_TYPE.to_le_bytes());
	buf.extend_from_slice(payload);
	Ok(())
}

/// Split an inbound transport blob into frame payload strings.
///
/// The blob is decoded as text (lossily — header bytes are garbage anyway),
/// split on NUL, and filtered by [`NOISE_THRESHOLD_CHARS`].
pub fn split_frames(blob: &[u8]) -> Vec<String> {
	let text = String::from_utf8_lossy(blob);
	text.split('\0')
		.filter(|seg| seg.chars().count() > NOISE_THRESHOLD_CHARS)
		.map(|seg| seg.to_string())
		.collect()
}
