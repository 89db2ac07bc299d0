//! # Publishing
//!
//! Outbound requests and the correlation of their acks and responses.
//!
//! A request is registered under a fresh message id before its first
//! fragment is published on the shared subject of the target. Every
//! responder acks; a `100 Continue` ack pulls the remaining fragments to
//! the responder's instance subject. The request ends when:
//!
//! - no ack arrives within the network hop (404 `ack timeout`),
//! - the deadline passes (408 `timeout`),
//! - the first response arrives (unicast), or
//! - every responder that acked has responded, once acks are no longer
//!   expected (multicast).
//!
//! Multicast requests remember the queues that responded per subject so the
//! next request to the same subject can stop waiting for acks as soon as
//! those queues were heard from.

use crate::connector::{Connector, Inner, Resolved};
use crate::domain::{OpContext, PublishOptions};
use crate::error::ConnectorError;
use mb_01_subjects::{instance_host, request_subject};
use mb_02_fragmentation::fragment;
use mb_telemetry::inject_current;
use mb_telemetry::metrics::{ACK_TIMEOUTS, FRAGMENTS_SENT, REQUESTS_SENT, TIMEOUTS};
use rand::distributions::Alphanumeric;
use rand::Rng;
use shared_bus::{Bus, BusSubscription};
use shared_types::header::HeaderValue;
use shared_types::message::CONTENT_LENGTH;
use shared_types::{
    decode, encode, join_host_and_path, strip_reserved, FrameMut, OpCode, ParsedUrl, Request,
    Response, StatusCode, TracedError, WireMessage,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Length of the random message id.
pub const MSG_ID_LEN: usize = 8;

const MULTICAST_BUFFER: usize = 64;
const UNICAST_BUFFER: usize = 2;

/// Stream of responses of one request. Errors of individual responders and
/// of the request as a whole arrive as `Err` items.
pub type ResponseStream = mpsc::Receiver<Result<Response, TracedError>>;

/// A request ready to go on the bus.
struct Outgoing {
    req: Request,
    msg_id: String,
    subject: String,
    host: String,
    port: u16,
    path: String,
    deadline: Instant,
    multicast: bool,
    resolved: Resolved,
}

fn new_msg_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(MSG_ID_LEN)
        .map(char::from)
        .collect()
}

impl Inner {
    fn prepare(&self, ctx: &OpContext, options: PublishOptions) -> Result<Outgoing, TracedError> {
        let resolved = self
            .resolved()
            .ok_or_else(|| ConnectorError::NotStarted.into_traced())?;

        let url = join_host_and_path(&resolved.host, &options.full_url());
        let parsed = ParsedUrl::parse(&url).map_err(|e| TracedError::with_code(400, e.to_string()))?;

        let now = Instant::now();
        let deadline = ctx.deadline().unwrap_or_else(|| {
            now + options
                .time_budget
                .unwrap_or(resolved.default_time_budget)
        });
        let budget = deadline.saturating_duration_since(now);
        if budget <= resolved.network_hop {
            TIMEOUTS.inc();
            return Err(TracedError::with_code(408, "timeout").trace());
        }
        let depth = ctx.frame().call_depth();
        if depth >= resolved.max_call_depth {
            return Err(TracedError::with_code(508, "call depth overflow")
                .with_property("depth", depth.to_string())
                .trace());
        }

        let msg_id = new_msg_id();
        let mut headers = options.headers;
        strip_reserved(&mut headers);
        {
            let mut frame = FrameMut::of(&mut headers);
            frame
                .set_from_host(&resolved.host)
                .set_from_id(&self.id)
                .set_from_version(resolved.version)
                .set_msg_id(&msg_id)
                .set_time_budget(budget)
                .set_call_depth(depth + 1)
                .set_op_code(OpCode::Request);
            if let Some(parent) = ctx.frame().traceparent() {
                frame.set_traceparent(parent);
            }
            if let Some(state) = ctx.frame().tracestate() {
                frame.set_tracestate(state);
            }
        }
        inject_current(&mut headers);
        if !options.body.is_empty() {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(options.body.len()));
        }

        let subject = request_subject(&resolved.plane, &parsed.host, parsed.port, &parsed.path);
        let mut req = Request::new(options.method, parsed.to_string());
        req.headers = headers;
        req.body = options.body;
        Ok(Outgoing {
            req,
            msg_id,
            subject,
            host: parsed.host,
            port: parsed.port,
            path: parsed.path,
            deadline,
            multicast: options.multicast,
            resolved,
        })
    }
}

impl Connector {
    /// Send a request and stream back its responses.
    ///
    /// The stream ends when the request completes. A request that could
    /// not be sent yields a single error.
    pub fn publish(&self, ctx: &OpContext, options: PublishOptions) -> ResponseStream {
        let capacity = if options.is_multicast() {
            MULTICAST_BUFFER
        } else {
            UNICAST_BUFFER
        };
        let (tx, rx) = mpsc::channel(capacity);
        match self.inner.prepare(ctx, options) {
            Ok(outgoing) => {
                tokio::spawn(correlate(Arc::clone(&self.inner), outgoing, tx));
            }
            Err(err) => {
                let _ = tx.try_send(Err(err));
            }
        }
        rx
    }

    /// Send a unicast request and wait for its response.
    pub async fn request(&self, ctx: &OpContext, options: PublishOptions) -> Result<Response, TracedError> {
        let mut responses = self.publish(ctx, options.unicast());
        match responses.recv().await {
            Some(result) => result,
            None => Err(TracedError::with_code(404, "ack timeout")),
        }
    }

    /// Send a multicast request and collect every response. Fails on the
    /// first error.
    pub async fn multicast(&self, ctx: &OpContext, options: PublishOptions) -> Result<Vec<Response>, TracedError> {
        let mut responses = self.publish(ctx, options.multicast());
        let mut collected = Vec::new();
        while let Some(result) = responses.recv().await {
            collected.push(result?);
        }
        Ok(collected)
    }
}

async fn send(bus: &Arc<dyn Bus>, subject: &str, req: Request) -> Result<(), TracedError> {
    let payload = encode(&WireMessage::Request(req)).map_err(|e| TracedError::wrap(&e).trace())?;
    bus.publish(subject, payload)
        .await
        .map_err(|e| TracedError::with_code(502, e.to_string()).trace())
}

fn all_final(seen: &HashMap<String, OpCode>) -> bool {
    seen.values().all(|op| op.is_final())
}

/// Reconstitute the error a responder sent back.
fn responder_error(res: &Response) -> TracedError {
    TracedError::from_response_body(&res.body)
        .unwrap_or_else(|_| TracedError::with_code(500, "unparsable error response"))
}

async fn correlate(
    inner: Arc<Inner>,
    outgoing: Outgoing,
    tx: mpsc::Sender<Result<Response, TracedError>>,
) {
    let Outgoing {
        req,
        msg_id,
        subject,
        host,
        port,
        path,
        deadline,
        multicast,
        resolved,
    } = outgoing;
    let (_registration, mut awaiting) = inner.requests.register(&msg_id);
    let Some(bus) = inner.bus() else {
        let _ = tx.send(Err(ConnectorError::NotStarted.into_traced())).await;
        return;
    };

    let mode = if multicast { "multicast" } else { "unicast" };
    REQUESTS_SENT.with_label_values(&[req.method.as_str(), mode]).inc();
    let mut parts = fragment(req, resolved.max_fragment_size).into_iter();
    let Some(first) = parts.next() else {
        return;
    };
    let rest: Vec<Request> = parts.collect();
    if !rest.is_empty() {
        FRAGMENTS_SENT.inc_by((rest.len() + 1) as f64);
    }
    if let Err(err) = send(&bus, &subject, first).await {
        let _ = tx.send(Err(err)).await;
        return;
    }
    trace!(subject = %subject, msg_id = %msg_id, "Request sent");

    let known = if multicast {
        inner.known_responders.get(&subject)
    } else {
        None
    };
    let mut seen_ids: HashMap<String, OpCode> = HashMap::new();
    let mut seen_queues: HashSet<String> = HashSet::new();
    let mut responses = 0usize;
    let mut acks_done = false;

    let ack_timer = tokio::time::sleep(resolved.network_hop);
    let expiry = tokio::time::sleep_until(deadline);
    tokio::pin!(ack_timer, expiry);

    loop {
        tokio::select! {
            () = &mut expiry => {
                TIMEOUTS.inc();
                inner.known_responders.clear(&subject);
                debug!(subject = %subject, msg_id = %msg_id, responses, "Request timed out");
                let _ = tx.send(Err(TracedError::with_code(408, "timeout").trace())).await;
                return;
            }
            () = &mut ack_timer, if !acks_done => {
                acks_done = true;
                if seen_ids.is_empty() {
                    ACK_TIMEOUTS.inc();
                    inner.known_responders.clear(&subject);
                    debug!(subject = %subject, msg_id = %msg_id, "No responder acked");
                    let _ = tx.send(Err(TracedError::with_code(404, "ack timeout").trace())).await;
                    return;
                }
            }
            delivered = awaiting.recv() => {
                let Some(res) = delivered else {
                    return;
                };
                let frame = res.frame();
                let op = match frame.op_code() {
                    Ok(op) => op,
                    Err(e) => {
                        warn!(msg_id = %msg_id, error = %e, "Dropped response with bad op code");
                        continue;
                    }
                };
                let Some(from_id) = frame.from_id().map(str::to_string) else {
                    warn!(msg_id = %msg_id, "Dropped response without sender id");
                    continue;
                };
                let queue = frame.queue().map_or_else(|| from_id.clone(), str::to_string);

                match op {
                    OpCode::Ack => {
                        seen_ids.entry(from_id.clone()).or_insert(OpCode::Ack);
                        seen_queues.insert(queue);
                        if res.status == StatusCode::CONTINUE && !rest.is_empty() {
                            let direct = request_subject(
                                &resolved.plane,
                                &instance_host(&from_id, &host),
                                port,
                                &path,
                            );
                            for part in &rest {
                                if let Err(err) = send(&bus, &direct, part.clone()).await {
                                    warn!(subject = %direct, msg_id = %msg_id, error = %err, "Failed to send fragment");
                                    break;
                                }
                            }
                        }
                    }
                    OpCode::Response | OpCode::Error => {
                        seen_ids.insert(from_id, op);
                        seen_queues.insert(queue);
                        responses += 1;
                        let item = if op == OpCode::Error {
                            Err(responder_error(&res))
                        } else {
                            Ok(res)
                        };
                        if tx.send(item).await.is_err() || !multicast {
                            return;
                        }
                    }
                    OpCode::Request => {
                        warn!(msg_id = %msg_id, "Dropped request delivered as a response");
                        continue;
                    }
                }

                if !acks_done && known.as_ref().is_some_and(|k| *k == seen_queues) {
                    acks_done = true;
                }
            }
        }

        if multicast && acks_done && all_final(&seen_ids) {
            inner.known_responders.store(&subject, seen_queues);
            return;
        }
    }
}

/// Route every message on the response subject of this instance to the
/// request awaiting it.
pub(crate) async fn response_loop(inner: Weak<Inner>, mut sub: BusSubscription) {
    while let Some(msg) = sub.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let res = match decode(&msg.payload) {
            Ok(WireMessage::Response(res)) => res,
            Ok(WireMessage::Request(_)) => {
                warn!(subject = %msg.subject, "Dropped request delivered to the response subject");
                continue;
            }
            Err(e) => {
                warn!(subject = %msg.subject, error = %e, "Dropped undecodable response");
                continue;
            }
        };
        let frame = res.frame();
        let (Some(msg_id), Some(from_id)) = (
            frame.msg_id().map(str::to_string),
            frame.from_id().map(str::to_string),
        ) else {
            warn!(subject = %msg.subject, "Dropped response with incomplete frame");
            continue;
        };
        let store = inner.res_defrags.read().clone();
        let res = match store.add(&from_id, &msg_id, res) {
            Ok(Some(res)) => res,
            Ok(None) => continue,
            Err(e) => {
                warn!(msg_id = %msg_id, error = %e, "Dropped response fragment");
                continue;
            }
        };
        inner.requests.deliver(&msg_id, res);
    }
}
