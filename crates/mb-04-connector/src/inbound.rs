//! # Inbound Requests
//!
//! Delivery loop of a subscription. Every request is acknowledged on its
//! first fragment, reassembled, and dispatched to the handler on its own
//! task under the pending operations counter. The handler's response, or
//! its error serialised as JSON, is fragmented and published back on the
//! caller's response subject.

use crate::connector::{Inner, Resolved, Route};
use crate::domain::run_guarded;
use crate::ops::OpGuard;
use mb_01_subjects::response_subject;
use mb_02_fragmentation::fragment;
use mb_telemetry::metrics::{HistogramTimer, FRAGMENTS_SENT, HANDLER_DURATION, REQUESTS_HANDLED};
use mb_telemetry::set_remote_parent;
use shared_bus::BusSubscription;
use shared_types::message::{CONTENT_TYPE, JSON_CONTENT_TYPE};
use shared_types::header::HeaderValue;
use shared_types::{
    decode, encode, FrameMut, OpCode, Request, Response, StatusCode, TracedError, WireMessage,
};
use std::sync::Arc;
use tracing::{debug, error, warn, Instrument};

/// Where the reply to a request goes.
struct Caller {
    host: String,
    id: String,
    msg_id: String,
    /// Queue reported back so that multicast callers can learn responders.
    queue: String,
}

pub(crate) async fn deliver(inner: Arc<Inner>, route: Arc<Route>, mut sub: BusSubscription) {
    while let Some(msg) = sub.recv().await {
        receive(&inner, &route, &msg.payload).await;
    }
    debug!(endpoint = %route.key, "Delivery loop ended");
}

async fn receive(inner: &Arc<Inner>, route: &Arc<Route>, payload: &[u8]) {
    let Some(resolved) = inner.resolved() else {
        return;
    };
    let req = match decode(payload) {
        Ok(WireMessage::Request(req)) => req,
        Ok(WireMessage::Response(_)) => {
            warn!(endpoint = %route.key, "Dropped response delivered to a request subject");
            return;
        }
        Err(e) => {
            warn!(endpoint = %route.key, error = %e, "Dropped undecodable request");
            return;
        }
    };

    let frame = req.frame();
    let caller = match (
        frame.require_from_host(),
        frame.require_from_id(),
        frame.require_msg_id(),
    ) {
        (Ok(host), Ok(id), Ok(msg_id)) => Caller {
            host: host.to_string(),
            id: id.to_string(),
            msg_id: msg_id.to_string(),
            queue: route.reply_queue(&inner.id),
        },
        _ => {
            warn!(endpoint = %route.key, "Dropped request with incomplete frame");
            return;
        }
    };
    let (index, max) = match frame.fragment() {
        Ok(f) => f,
        Err(e) => {
            warn!(endpoint = %route.key, error = %e, "Dropped request with bad fragment header");
            return;
        }
    };

    let store = inner.req_defrags.read().clone();
    if max > store.max_fragments() {
        warn!(endpoint = %route.key, msg_id = %caller.msg_id, fragments = max, "Refused oversized request");
        let err = TracedError::with_code(
            StatusCode::PAYLOAD_TOO_LARGE.as_u16(),
            format!("request of {max} fragments exceeds the limit of {}", store.max_fragments()),
        );
        REQUESTS_HANDLED.with_label_values(&[StatusCode::PAYLOAD_TOO_LARGE.as_str()]).inc();
        reply(inner, &resolved, &caller, OpCode::Error, error_response(&err)).await;
        return;
    }

    if index == 1 {
        // 100 asks the caller to send the remaining fragments here.
        let status = if max > 1 {
            StatusCode::CONTINUE
        } else {
            StatusCode::ACCEPTED
        };
        reply(inner, &resolved, &caller, OpCode::Ack, Response::new(status)).await;
    }

    let req = match store.add(&caller.id, &caller.msg_id, req) {
        Ok(Some(req)) => req,
        Ok(None) => return,
        Err(e) => {
            warn!(endpoint = %route.key, msg_id = %caller.msg_id, error = %e, "Dropped fragment");
            return;
        }
    };

    let guard = inner.pending_ops.enter();
    tokio::spawn(dispatch(
        Arc::clone(inner),
        Arc::clone(route),
        resolved,
        req,
        caller,
        guard,
    ));
}

async fn dispatch(
    inner: Arc<Inner>,
    route: Arc<Route>,
    resolved: Resolved,
    mut req: Request,
    caller: Caller,
    _guard: OpGuard,
) {
    let _timer = HistogramTimer::new(&HANDLER_DURATION);
    let budget = req
        .frame()
        .time_budget()
        .unwrap_or(resolved.default_time_budget);
    let span = tracing::info_span!(
        "handle",
        endpoint = %route.key,
        method = %req.method,
        msg_id = %caller.msg_id,
        from = %caller.host,
    );
    set_remote_parent(&span, &req.headers);

    let ctx = inner
        .lifetime_context()
        .with_frame(req.headers.clone())
        .with_timeout(budget.saturating_sub(resolved.network_hop));
    let result = if route.method.as_ref().is_some_and(|m| *m != req.method) {
        Err(TracedError::with_code(
            404,
            format!("{} not found for method {}", route.key, req.method),
        ))
    } else {
        if let Ok(url) = req.parsed_url() {
            req.path_args = route.spec.extract(&url.path);
        }
        let handler = Arc::clone(&route.handler);
        let handler_ctx = ctx.clone();
        run_guarded(
            &ctx,
            async move { handler.handle(handler_ctx, req).await }.instrument(span.clone()),
        )
        .await
    };

    // The caller's deadline passes at the same time; it reports the timeout
    if result.is_err() && ctx.is_cancelled() && !ctx.is_shutting_down() {
        let _entered = span.enter();
        debug!(endpoint = %route.key, "Handler ran out of time budget");
        REQUESTS_HANDLED.with_label_values(&["408"]).inc();
        return;
    }

    let (op, res) = match result {
        Ok(res) => (OpCode::Response, res),
        Err(err) => {
            let _entered = span.enter();
            if err.status_code() >= 500 {
                error!(status = err.status_code(), error = %err, "Handler failed");
            } else {
                debug!(status = err.status_code(), error = %err, "Handler rejected request");
            }
            (OpCode::Error, error_response(&err))
        }
    };
    REQUESTS_HANDLED.with_label_values(&[res.status.as_str()]).inc();
    reply(&inner, &resolved, &caller, op, res).await;
}

fn error_response(err: &TracedError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Response::new(status)
        .with_header(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))
        .with_body(err.to_response_body())
}

/// Stamp the frame on a reply and publish it, fragmented, to the caller.
async fn reply(inner: &Inner, resolved: &Resolved, caller: &Caller, op: OpCode, mut res: Response) {
    let Some(bus) = inner.bus() else {
        return;
    };
    FrameMut::of(&mut res.headers)
        .set_from_host(&resolved.host)
        .set_from_id(&inner.id)
        .set_from_version(resolved.version)
        .set_msg_id(&caller.msg_id)
        .set_queue(&caller.queue)
        .set_op_code(op);

    let subject = response_subject(&resolved.plane, &caller.host, &caller.id);
    let parts = fragment(res, resolved.max_fragment_size);
    if parts.len() > 1 {
        FRAGMENTS_SENT.inc_by(parts.len() as f64);
    }
    for part in parts {
        let payload = match encode(&WireMessage::Response(part)) {
            Ok(payload) => payload,
            Err(e) => {
                error!(msg_id = %caller.msg_id, error = %e, "Failed to encode response");
                return;
            }
        };
        if let Err(e) = bus.publish(&subject, payload).await {
            warn!(subject = %subject, msg_id = %caller.msg_id, error = %e, "Failed to publish response");
            return;
        }
    }
}
