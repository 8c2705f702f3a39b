use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tether_domain::{AppError, ErrorCode, TraceId};
use tether_protocol::{Subject, SubjectPattern, decode_response};

use super::{Dispatcher, RequestContext, publish, request};
use crate::bus::{InMemoryBus, MessageBus};

const SUBJECT: &str = "platform.get_bot.twitch";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Echo {
	text: String,
}

fn pattern() -> SubjectPattern {
	SubjectPattern::parse(SUBJECT).unwrap()
}

fn subject() -> Subject {
	Subject::parse(SUBJECT).unwrap()
}

async fn echo_dispatcher(bus: Arc<InMemoryBus>, calls: Arc<AtomicUsize>, timeout: Duration) -> Dispatcher {
	let dispatcher = Dispatcher::new(bus, timeout);
	dispatcher
		.dispatch_request(pattern(), move |ctx: RequestContext, req: Echo| {
			let calls = Arc::clone(&calls);
			async move {
				calls.fetch_add(1, Ordering::SeqCst);
				if req.text == "fail" {
					return Err(AppError::not_found("nothing here"));
				}
				if req.text == "slow" {
					tokio::time::sleep(Duration::from_secs(5)).await;
				}
				Ok(Echo {
					text: format!("{}:{}", ctx.trace_id, req.text),
				})
			}
		})
		.await
		.unwrap();
	dispatcher
}

#[tokio::test]
async fn response_carries_request_trace_id() {
	let bus = Arc::new(InMemoryBus::new());
	let calls = Arc::new(AtomicUsize::new(0));
	let _d = echo_dispatcher(bus.clone(), calls.clone(), Duration::from_secs(5)).await;

	let raw = bus
		.request(
			SUBJECT,
			Bytes::from_static(br#"{"traceID":"abc-123","data":{"text":"hi"}}"#),
			Duration::from_secs(1),
		)
		.await
		.unwrap();
	let resp = decode_response::<Echo>(&raw).unwrap();
	assert_eq!(resp.trace_id.as_str(), "abc-123");
	assert!(resp.ok);
	assert_eq!(resp.data.unwrap().text, "abc-123:hi");

	let typed: Echo = request(
		bus.as_ref(),
		&subject(),
		&TraceId::new("t-2"),
		&Echo { text: "yo".into() },
		Duration::from_secs(1),
	)
	.await
	.unwrap();
	assert_eq!(typed.text, "t-2:yo");
}

#[tokio::test]
async fn undecodable_request_gets_internal_without_calling_handler() {
	let bus = Arc::new(InMemoryBus::new());
	let calls = Arc::new(AtomicUsize::new(0));
	let _d = echo_dispatcher(bus.clone(), calls.clone(), Duration::from_secs(5)).await;

	let raw = bus
		.request(
			SUBJECT,
			Bytes::from_static(br#"{"traceID":"bad-1","data":{"nope":true}}"#),
			Duration::from_secs(1),
		)
		.await
		.unwrap();
	let resp = decode_response::<Echo>(&raw).unwrap();
	assert!(!resp.ok);
	assert_eq!(resp.trace_id.as_str(), "bad-1");
	assert_eq!(resp.error.unwrap().code, ErrorCode::Internal);

	let raw = bus
		.request(SUBJECT, Bytes::from_static(b"not json"), Duration::from_secs(1))
		.await
		.unwrap();
	let resp = decode_response::<Echo>(&raw).unwrap();
	assert_eq!(resp.error.unwrap().code, ErrorCode::Internal);

	assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn handler_error_is_returned_in_envelope() {
	let bus = Arc::new(InMemoryBus::new());
	let _d = echo_dispatcher(bus.clone(), Arc::new(AtomicUsize::new(0)), Duration::from_secs(5)).await;

	let err = request::<_, Echo>(
		bus.as_ref(),
		&subject(),
		&TraceId::generate(),
		&Echo { text: "fail".into() },
		Duration::from_secs(1),
	)
	.await
	.unwrap_err();
	assert_eq!(err.code, ErrorCode::NotFound);
	assert_eq!(err.message, "nothing here");
}

#[tokio::test]
async fn deadline_overrun_replies_internal() {
	let bus = Arc::new(InMemoryBus::new());
	let _d = echo_dispatcher(bus.clone(), Arc::new(AtomicUsize::new(0)), Duration::from_millis(50)).await;

	let err = request::<_, Echo>(
		bus.as_ref(),
		&subject(),
		&TraceId::generate(),
		&Echo { text: "slow".into() },
		Duration::from_secs(2),
	)
	.await
	.unwrap_err();
	assert_eq!(err.code, ErrorCode::Internal);
}

#[tokio::test]
async fn replicas_share_work_exactly_once() {
	let bus = Arc::new(InMemoryBus::new());
	let calls = Arc::new(AtomicUsize::new(0));
	let _a = echo_dispatcher(bus.clone(), calls.clone(), Duration::from_secs(5)).await;
	let _b = echo_dispatcher(bus.clone(), calls.clone(), Duration::from_secs(5)).await;

	for i in 0..20 {
		let _: Echo = request(
			bus.as_ref(),
			&subject(),
			&TraceId::new(format!("t-{i}")),
			&Echo { text: "x".into() },
			Duration::from_secs(1),
		)
		.await
		.unwrap();
	}

	assert_eq!(calls.load(Ordering::SeqCst), 20);
}

#[tokio::test]
async fn publish_handler_runs_without_reply() {
	let bus = Arc::new(InMemoryBus::new());
	let seen = Arc::new(tokio::sync::Notify::new());
	let dispatcher = Dispatcher::new(bus.clone(), Duration::from_secs(1));
	{
		let seen = Arc::clone(&seen);
		dispatcher
			.dispatch_publish(
				SubjectPattern::parse("platform.chat_message_send.*").unwrap(),
				move |ctx: RequestContext, req: Echo| {
					let seen = Arc::clone(&seen);
					async move {
						assert_eq!(ctx.trace_id.as_str(), "fire-1");
						assert_eq!(req.text, "hello");
						seen.notify_one();
						Ok(())
					}
				},
			)
			.await
			.unwrap();
	}

	publish(
		bus.as_ref(),
		&Subject::parse("platform.chat_message_send.twitch").unwrap(),
		&TraceId::new("fire-1"),
		&Echo { text: "hello".into() },
	)
	.await
	.unwrap();

	tokio::time::timeout(Duration::from_secs(1), seen.notified())
		.await
		.expect("handler ran");
}
