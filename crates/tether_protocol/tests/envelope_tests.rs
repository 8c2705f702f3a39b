use proptest::prelude::*;
use tether_domain::{AppError, ErrorCode, TraceId, UserId};
use tether_protocol::messages::{BotToggle, ChatMessageSend};
use tether_protocol::{
	DEFAULT_MAX_ENVELOPE_SIZE, EnvelopeError, Request, Response, decode_request, decode_response, encode,
};

#[test]
fn request_wire_shape() {
	let user_id = UserId::new_v4();
	let req = Request::new(TraceId::from("abc-123"), BotToggle { user_id });

	let raw = encode(&req).expect("encode");
	let json: serde_json::Value = serde_json::from_slice(&raw).expect("json");

	assert_eq!(json["traceID"], "abc-123");
	assert_eq!(json["data"]["userId"], user_id.to_string());

	let back = decode_request::<BotToggle>(&raw).expect("decode");
	assert_eq!(back, req);
}

#[test]
fn success_response_roundtrip() {
	let resp = Response::success(TraceId::from("abc-123"), true);
	let raw = encode(&resp).expect("encode");

	let back = decode_response::<bool>(&raw).expect("decode");
	assert_eq!(back.trace_id.as_str(), "abc-123");
	assert_eq!(back.into_result(), Ok(true));
}

#[test]
fn failure_response_keeps_code() {
	let resp: Response<bool> = Response::from_result(TraceId::from("t"), Err(AppError::upstream("helix 500")));
	let raw = encode(&resp).expect("encode");

	let err = decode_response::<bool>(&raw)
		.expect("decode")
		.into_result()
		.unwrap_err();
	assert_eq!(err.code, ErrorCode::Upstream);
}

#[test]
fn optional_reply_to_is_omitted() {
	let req = Request::new(
		TraceId::from("t"),
		ChatMessageSend {
			bot_id: "bot".to_string(),
			broadcaster_id: "b".to_string(),
			message: "hi!".to_string(),
			reply_to: None,
		},
	);
	let json: serde_json::Value = serde_json::from_slice(&encode(&req).unwrap()).unwrap();
	assert!(json["data"].get("replyTo").is_none());
}

#[test]
fn decode_rejects_oversized_input() {
	let raw = vec![b' '; DEFAULT_MAX_ENVELOPE_SIZE + 1];
	match decode_request::<BotToggle>(&raw).unwrap_err() {
		EnvelopeError::TooLarge { len, max } => assert!(len > max),
		other => panic!("unexpected error: {other:?}"),
	}
}

#[test]
fn decode_rejects_wrong_payload_type() {
	let raw = br#"{"traceID":"x","data":"not-an-object"}"#;
	assert!(matches!(decode_request::<BotToggle>(raw), Err(EnvelopeError::Json(_))));
}

proptest! {
	#[test]
	fn trace_id_survives_request_and_response(trace in "[A-Za-z0-9-]{1,64}") {
		let req = Request::new(TraceId::new(trace.clone()), 7u32);
		let decoded = decode_request::<u32>(&encode(&req).unwrap()).unwrap();

		let resp = Response::success(decoded.trace_id, decoded.data + 1);
		let back = decode_response::<u32>(&encode(&resp).unwrap()).unwrap();

		prop_assert_eq!(back.trace_id.as_str(), trace.as_str());
		prop_assert_eq!(back.into_result(), Ok(8));
	}
}
