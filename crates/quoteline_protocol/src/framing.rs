#![forbid(unsafe_code)]

//! Length-prefixed protobuf frames: `u32` big-endian payload length, then the
//! encoded message.

use bytes::{Buf, BufMut, BytesMut};
use prost::Message;
use thiserror::Error;

/// Default maximum frame payload size.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024; // 1 MiB

const PREFIX_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum FramingError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge { len: usize, max: usize },

	#[error("incomplete frame: need={need} have={have}")]
	Incomplete { need: usize, have: usize },

	#[error("protobuf decode error: {0}")]
	Decode(#[from] prost::DecodeError),

	#[error("protobuf encode error: {0}")]
	Encode(#[from] prost::EncodeError),
}

fn check_len(len: usize, max: usize) -> Result<(), FramingError> {
	if len > max {
		return Err(FramingError::FrameTooLarge { len, max });
	}
	Ok(())
}

/// Encode `msg` as a standalone frame.
pub fn encode_frame<M: Message>(msg: &M, max_frame_size: usize) -> Result<Vec<u8>, FramingError> {
	let mut out = BytesMut::new();
	encode_frame_into(&mut out, msg, max_frame_size)?;
	Ok(out.to_vec())
}

/// Append one frame to `buf`.
pub fn encode_frame_into<M: Message>(buf: &mut BytesMut, msg: &M, max_frame_size: usize) -> Result<(), FramingError> {
	let payload_len = msg.encoded_len();
	check_len(payload_len, max_frame_size)?;

	buf.reserve(PREFIX_LEN + payload_len);
	buf.put_u32(payload_len as u32);
	msg.encode(buf)?;
	Ok(())
}

/// Decode exactly one frame from the start of `src`, returning the message and
/// the number of bytes consumed.
pub fn decode_frame<M: Message + Default>(src: &[u8], max_frame_size: usize) -> Result<(M, usize), FramingError> {
	let Some(len) = peek_len(src) else {
		return Err(FramingError::Incomplete {
			need: PREFIX_LEN,
			have: src.len(),
		});
	};
	check_len(len, max_frame_size)?;

	let need = PREFIX_LEN + len;
	if src.len() < need {
		return Err(FramingError::Incomplete { need, have: src.len() });
	}

	Ok((M::decode(&src[PREFIX_LEN..need])?, need))
}

fn peek_len(src: &[u8]) -> Option<usize> {
	let prefix: [u8; PREFIX_LEN] = src.get(..PREFIX_LEN)?.try_into().ok()?;
	Some(u32::from_be_bytes(prefix) as usize)
}

/// Incremental decoder for a byte stream that may deliver frames in arbitrary
/// chunks.
#[derive(Debug)]
pub struct FrameDecoder {
	buf: BytesMut,
	max_frame_size: usize,
}

impl FrameDecoder {
	pub fn new(max_frame_size: usize) -> Self {
		Self {
			buf: BytesMut::with_capacity(16 * 1024),
			max_frame_size,
		}
	}

	pub fn extend(&mut self, chunk: &[u8]) {
		self.buf.extend_from_slice(chunk);
	}

	/// Bytes received but not yet consumed as a frame.
	pub fn buffered(&self) -> usize {
		self.buf.len()
	}

	/// Next complete frame, or `None` until more bytes arrive.
	///
	/// An oversized length prefix fails immediately instead of waiting for the
	/// payload.
	pub fn next_frame<M: Message + Default>(&mut self) -> Result<Option<M>, FramingError> {
		let Some(len) = peek_len(&self.buf) else {
			return Ok(None);
		};
		check_len(len, self.max_frame_size)?;

		if self.buf.len() < PREFIX_LEN + len {
			return Ok(None);
		}

		self.buf.advance(PREFIX_LEN);
		let payload = self.buf.split_to(len);
		Ok(Some(M::decode(payload.freeze())?))
	}
}

impl Default for FrameDecoder {
	fn default() -> Self {
		Self::new(DEFAULT_MAX_FRAME_SIZE)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::pb;

	fn ping(ms: i64) -> pb::Ping {
		pb::Ping { client_time_unix_ms: ms }
	}

	#[test]
	fn decode_reports_missing_payload() {
		let frame = encode_frame(&ping(7), DEFAULT_MAX_FRAME_SIZE).expect("encode");

		match decode_frame::<pb::Ping>(&frame[..PREFIX_LEN], DEFAULT_MAX_FRAME_SIZE).unwrap_err() {
			FramingError::Incomplete { need, have } => {
				assert_eq!(need, frame.len());
				assert_eq!(have, PREFIX_LEN);
			}
			other => panic!("unexpected error: {other:?}"),
		}
	}

	#[test]
	fn decoder_rejects_oversized_prefix_before_payload_arrives() {
		let mut dec = FrameDecoder::new(16);
		dec.extend(&17u32.to_be_bytes());
		assert!(matches!(
			dec.next_frame::<pb::Ping>(),
			Err(FramingError::FrameTooLarge { len: 17, max: 16 })
		));
	}

	#[test]
	fn decoder_leaves_trailing_partial_frame_buffered() {
		let mut bytes = encode_frame(&ping(1), DEFAULT_MAX_FRAME_SIZE).expect("encode");
		let second = encode_frame(&ping(2), DEFAULT_MAX_FRAME_SIZE).expect("encode");
		bytes.extend_from_slice(&second[..3]);

		let mut dec = FrameDecoder::default();
		dec.extend(&bytes);
		assert_eq!(dec.next_frame::<pb::Ping>().expect("ok"), Some(ping(1)));
		assert_eq!(dec.next_frame::<pb::Ping>().expect("ok"), None);
		assert_eq!(dec.buffered(), 3);
	}
}
