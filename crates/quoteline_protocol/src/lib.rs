#![forbid(unsafe_code)]

pub mod convert;
pub mod framing;
pub mod pb;

pub use convert::ConvertError;
pub use framing::{DEFAULT_MAX_FRAME_SIZE, FrameDecoder, FramingError, decode_frame, encode_frame, encode_frame_into};

/// Protocol version constants.
pub mod version {
	/// Value carried in `pb::Envelope.version`.
	pub const PROTOCOL_VERSION: u32 = 1;

	/// ALPN identifier negotiated by client and server.
	pub const ALPN: &[u8] = b"quoteline-v1";
}

/// Wrap `msg` into an envelope correlated by `request_id`.
pub fn envelope(request_id: impl Into<String>, msg: pb::envelope::Msg) -> pb::Envelope {
	pb::Envelope {
		version: version::PROTOCOL_VERSION,
		request_id: request_id.into(),
		msg: Some(msg),
	}
}
