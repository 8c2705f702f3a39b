#![forbid(unsafe_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tether_domain::{AppError, TraceId};
use tether_protocol::{Response, SubjectPattern, decode_request, encode, peek_trace_id};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

use super::RequestContext;
use crate::bus::{BusMessage, MessageBus};

/// Binds subject patterns to typed handlers.
///
/// Every pattern is consumed through a queue group named after the pattern, so each
/// message is handled by exactly one replica. Each message runs in its own task.
pub struct Dispatcher {
	bus: Arc<dyn MessageBus>,
	timeout: Duration,
	loops: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
	pub fn new(bus: Arc<dyn MessageBus>, timeout: Duration) -> Self {
		Self {
			bus,
			timeout,
			loops: Mutex::new(Vec::new()),
		}
	}

	pub fn bus(&self) -> &Arc<dyn MessageBus> {
		&self.bus
	}

	/// Request/response handler. The result is sent to the message's reply subject, if any.
	pub async fn dispatch_request<Req, Resp, F, Fut>(&self, pattern: SubjectPattern, handler: F) -> anyhow::Result<()>
	where
		Req: DeserializeOwned + Send + 'static,
		Resp: Serialize + Send + 'static,
		F: Fn(RequestContext, Req) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Resp, AppError>> + Send + 'static,
	{
		let handler = Arc::new(handler);
		self.consume(pattern, move |bus, msg, timeout| {
			let handler = Arc::clone(&handler);
			async move { handle_request(bus, msg, timeout, handler).await }
		})
		.await
	}

	/// Fire-and-forget handler. Failures are logged; nothing is sent back.
	pub async fn dispatch_publish<Req, F, Fut>(&self, pattern: SubjectPattern, handler: F) -> anyhow::Result<()>
	where
		Req: DeserializeOwned + Send + 'static,
		F: Fn(RequestContext, Req) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<(), AppError>> + Send + 'static,
	{
		let handler = Arc::new(handler);
		self.consume(pattern, move |_bus, msg, timeout| {
			let handler = Arc::clone(&handler);
			async move { handle_publish(msg, timeout, handler).await }
		})
		.await
	}

	async fn consume<H, HFut>(&self, pattern: SubjectPattern, on_message: H) -> anyhow::Result<()>
	where
		H: Fn(Arc<dyn MessageBus>, BusMessage, Duration) -> HFut + Send + Sync + 'static,
		HFut: Future<Output = ()> + Send + 'static,
	{
		let group = pattern.as_str().to_string();
		let mut sub = self.bus.queue_subscribe(pattern.as_str(), &group).await?;
		let bus = Arc::clone(&self.bus);
		let timeout = self.timeout;

		info!(pattern = %pattern, "handler registered");

		let handle = tokio::spawn(async move {
			while let Some(msg) = sub.next().await {
				tokio::spawn(on_message(Arc::clone(&bus), msg, timeout));
			}
			debug!(pattern = %group, "subscription ended");
		});
		self.loops.lock().push(handle);
		Ok(())
	}

	/// Stop consuming. Handlers already running finish on their own.
	pub fn shutdown(&self) {
		for handle in self.loops.lock().drain(..) {
			handle.abort();
		}
	}
}

async fn run_handler<Req, Resp, F, Fut>(
	msg: &BusMessage,
	timeout: Duration,
	handler: &F,
) -> (TraceId, Result<Resp, AppError>)
where
	Req: DeserializeOwned,
	F: Fn(RequestContext, Req) -> Fut,
	Fut: Future<Output = Result<Resp, AppError>>,
{
	metrics::counter!("tether_rpc_requests_total").increment(1);

	let req = match decode_request::<Req>(&msg.payload) {
		Ok(req) => req,
		Err(e) => {
			metrics::counter!("tether_rpc_decode_failures_total").increment(1);
			let trace_id = peek_trace_id(&msg.payload).unwrap_or_default();
			warn!(subject = %msg.subject, trace_id = %trace_id, error = %e, "failed to decode request");
			return (trace_id, Err(AppError::internal("malformed request")));
		}
	};

	let trace_id = req.trace_id;
	let ctx = RequestContext::new(trace_id.clone(), msg.subject.clone(), timeout);
	let span = info_span!("rpc", trace_id = %trace_id, subject = %msg.subject);

	let result = async {
		match tokio::time::timeout(timeout, handler(ctx, req.data)).await {
			Ok(Ok(resp)) => Ok(resp),
			Ok(Err(e)) => {
				debug!(code = %e.code, error = %e.message, "handler failed");
				Err(e)
			}
			Err(_) => {
				warn!(timeout_ms = timeout.as_millis() as u64, "handler exceeded deadline");
				Err(AppError::internal("request deadline exceeded"))
			}
		}
	}
	.instrument(span)
	.await;

	(trace_id, result)
}

async fn handle_request<Req, Resp, F, Fut>(bus: Arc<dyn MessageBus>, msg: BusMessage, timeout: Duration, handler: Arc<F>)
where
	Req: DeserializeOwned,
	Resp: Serialize,
	F: Fn(RequestContext, Req) -> Fut,
	Fut: Future<Output = Result<Resp, AppError>>,
{
	let (trace_id, result) = run_handler(&msg, timeout, handler.as_ref()).await;

	let Some(reply) = msg.reply.as_deref() else {
		debug!(subject = %msg.subject, trace_id = %trace_id, ok = result.is_ok(), "no reply subject, result dropped");
		return;
	};

	let response = Response::from_result(trace_id.clone(), result);
	let bytes = match encode(&response) {
		Ok(b) => b,
		Err(e) => {
			warn!(subject = %msg.subject, trace_id = %trace_id, error = %e, "failed to encode response");
			match encode(&Response::<()>::failure(trace_id.clone(), &AppError::internal("response encoding failed"))) {
				Ok(b) => b,
				Err(_) => return,
			}
		}
	};

	if let Err(e) = bus.publish(reply, bytes).await {
		warn!(subject = %msg.subject, trace_id = %trace_id, error = %e, "failed to send reply");
	}
}

async fn handle_publish<Req, F, Fut>(msg: BusMessage, timeout: Duration, handler: Arc<F>)
where
	Req: DeserializeOwned,
	F: Fn(RequestContext, Req) -> Fut,
	Fut: Future<Output = Result<(), AppError>>,
{
	let (trace_id, result) = run_handler(&msg, timeout, handler.as_ref()).await;
	if let Err(e) = result {
		warn!(subject = %msg.subject, trace_id = %trace_id, code = %e.code, error = %e.message, "event handler failed");
	}
}
