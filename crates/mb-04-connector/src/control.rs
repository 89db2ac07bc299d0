//! # Control Plane
//!
//! Endpoints every connector serves on port 888, both on its own host and
//! on the broadcast host `all`, without a queue so that every replica
//! answers:
//!
//! | Path              | Effect                                         |
//! |-------------------|------------------------------------------------|
//! | `/ping`           | Responds `{"pong":0}`                          |
//! | `/config-refresh` | Re-reads the environment and fires callbacks   |
//! | `/trace?id=<hex>` | Elects a trace for export by the selector      |

use crate::connector::{Connector, Inner};
use crate::domain::{OpContext, PublishOptions, SubscribeOptions};
use crate::error::ConnectorError;
use mb_03_selective_tracing::{format_trace_id, parse_trace_id};
use serde_json::json;
use shared_types::{Request, Response, StatusCode, TracedError, ALL_HOSTS, CONTROL_PORT};
use std::sync::{Arc, Weak};
use tracing::debug;

const PING: &str = "ping";
const CONFIG_REFRESH: &str = "config-refresh";
const TRACE: &str = "trace";

impl Inner {
    /// Record the control subscriptions on the connector's host and on
    /// `all`. They are activated with the other subscriptions.
    pub(crate) fn install_control(self: &Arc<Self>) -> Result<(), ConnectorError> {
        let host = self.identity.read().host.clone();
        for target in [host.as_str(), ALL_HOSTS] {
            let ping = |_ctx: OpContext, _req: Request| async move { Response::json(&json!({ "pong": 0 })) };
            self.record_control(target, PING, Arc::new(ping))?;

            let weak = Arc::downgrade(self);
            let refresh = move |_ctx: OpContext, _req: Request| {
                let weak = weak.clone();
                async move {
                    let con = upgrade(&weak)?;
                    let changed = con.refresh_config().map_err(ConnectorError::into_traced)?;
                    Response::json(&json!({ "changed": changed }))
                }
            };
            self.record_control(target, CONFIG_REFRESH, Arc::new(refresh))?;

            let weak = Arc::downgrade(self);
            let trace = move |_ctx: OpContext, req: Request| {
                let weak = weak.clone();
                async move {
                    let con = upgrade(&weak)?;
                    let raw = req
                        .query_arg("id")
                        .ok_or_else(|| TracedError::with_code(400, "missing trace id"))?;
                    let trace_id = parse_trace_id(&raw)
                        .ok_or_else(|| TracedError::with_code(400, format!("invalid trace id {raw:?}")))?;
                    let selector = con.inner.trace_selector.read().clone();
                    if let Some(selector) = selector {
                        selector.select(trace_id);
                    }
                    Ok::<_, TracedError>(Response::new(StatusCode::OK))
                }
            };
            self.record_control(target, TRACE, Arc::new(trace))?;
        }
        Ok(())
    }

    fn record_control(
        &self,
        host: &str,
        path: &str,
        handler: Arc<dyn crate::domain::Handler>,
    ) -> Result<(), ConnectorError> {
        let url = format!("https://{host}:{CONTROL_PORT}/{path}");
        let route = self.build_route(&url, handler, SubscribeOptions::new().no_queue())?;
        self.record(Arc::new(route));
        Ok(())
    }
}

fn upgrade(weak: &Weak<Inner>) -> Result<Connector, TracedError> {
    weak.upgrade()
        .map(|inner| Connector { inner })
        .ok_or_else(|| TracedError::with_code(503, "shutting down"))
}

impl Connector {
    /// Ask every connector to export the spans of `trace_id`.
    ///
    /// Nothing is broadcast when the local selector already knew the trace.
    pub async fn force_trace(&self, ctx: &OpContext, trace_id: u128) {
        let selector = self.inner.trace_selector.read().clone();
        if let Some(selector) = selector {
            if !selector.select(trace_id) {
                return;
            }
        }
        let url = format!("https://{ALL_HOSTS}:{CONTROL_PORT}/{TRACE}");
        let options = PublishOptions::get(url).query("id", format_trace_id(trace_id));
        let mut responses = self.publish(ctx, options);
        while let Some(result) = responses.recv().await {
            if let Err(e) = result {
                debug!(trace_id = %format_trace_id(trace_id), error = %e, "Trace election not acknowledged");
            }
        }
    }

    /// [`Connector::force_trace`] on the trace of the current span. A no-op
    /// outside of a sampled trace.
    pub async fn force_trace_current(&self, ctx: &OpContext) {
        if let Some(trace_id) = mb_telemetry::current_trace_id() {
            self.force_trace(ctx, trace_id).await;
        }
    }
}
