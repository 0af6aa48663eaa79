use proptest::prelude::*;
use quoteline_protocol::pb::{self, envelope::Msg};
use quoteline_protocol::{DEFAULT_MAX_FRAME_SIZE, FrameDecoder, FramingError, decode_frame, encode_frame, encode_frame_into, envelope};

fn join(room: &str) -> pb::Envelope {
	envelope("r-1", Msg::Join(pb::Join { room: room.to_string() }))
}

fn chat(text: &str) -> pb::Envelope {
	envelope(
		"r-2",
		Msg::SendMessage(pb::SendMessage {
			scope: "order:o-1".to_string(),
			customer_id: "c-1".to_string(),
			sender: pb::Sender::Customer as i32,
			text: text.to_string(),
			sent_at_ms: 1_700_000_000_000,
		}),
	)
}

#[test]
fn envelope_frame_decodes_with_request_id() {
	let frame = encode_frame(&join("customer:c-1"), DEFAULT_MAX_FRAME_SIZE).expect("encode");
	let (decoded, used) = decode_frame::<pb::Envelope>(&frame, DEFAULT_MAX_FRAME_SIZE).expect("decode");

	assert_eq!(used, frame.len());
	assert_eq!(decoded.request_id, "r-1");
	assert_eq!(decoded.version, quoteline_protocol::version::PROTOCOL_VERSION);
	match decoded.msg {
		Some(Msg::Join(j)) => assert_eq!(j.room, "customer:c-1"),
		other => panic!("unexpected message: {other:?}"),
	}
}

#[test]
fn encode_into_preserves_existing_bytes() {
	let mut buf = bytes::BytesMut::new();
	buf.extend_from_slice(b"xx");
	encode_frame_into(&mut buf, &join("staff"), DEFAULT_MAX_FRAME_SIZE).expect("encode");

	assert_eq!(&buf[..2], b"xx");
	let (decoded, _) = decode_frame::<pb::Envelope>(&buf[2..], DEFAULT_MAX_FRAME_SIZE).expect("decode");
	assert_eq!(decoded, join("staff"));
}

#[test]
fn oversized_message_is_rejected_on_encode() {
	let err = encode_frame(&chat(&"a".repeat(4096)), 256).unwrap_err();
	match err {
		FramingError::FrameTooLarge { len, max } => {
			assert_eq!(max, 256);
			assert!(len > max);
		}
		other => panic!("unexpected error: {other:?}"),
	}
}

#[test]
fn garbage_payload_is_a_decode_error() {
	let mut dec = FrameDecoder::default();
	dec.extend(&3u32.to_be_bytes());
	dec.extend(&[0xff, 0xff, 0xff]);
	assert!(matches!(dec.next_frame::<pb::Envelope>(), Err(FramingError::Decode(_))));
}

proptest! {
	#[test]
	fn decoder_reassembles_frames_across_arbitrary_chunking(
		texts in proptest::collection::vec(".{0,64}", 1..6),
		cuts in proptest::collection::vec(1usize..32, 1..40),
	) {
		let expected: Vec<pb::Envelope> = texts.iter().map(|t| chat(t)).collect();
		let mut wire = Vec::new();
		for env in &expected {
			wire.extend(encode_frame(env, DEFAULT_MAX_FRAME_SIZE).expect("encode"));
		}

		let mut dec = FrameDecoder::default();
		let mut got = Vec::new();
		let mut rest = wire.as_slice();
		let mut cuts = cuts.into_iter().cycle();
		while !rest.is_empty() {
			let n = cuts.next().unwrap_or(1).min(rest.len());
			dec.extend(&rest[..n]);
			rest = &rest[n..];
			while let Some(env) = dec.next_frame::<pb::Envelope>().expect("decode") {
				got.push(env);
			}
		}

		prop_assert_eq!(got, expected);
		prop_assert_eq!(dec.buffered(), 0);
	}
}
