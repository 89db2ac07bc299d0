//! Endpoints the replicas of a host serve to each other.
//!
//! `<base>/all` is subscribed without a queue so that every replica sees
//! every broadcast; the `do` query argument names the action. `<base>/rescue`
//! sits on the default queue so that each rescued element lands on exactly
//! one peer.

use crate::cache::CacheInner;
use async_trait::async_trait;
use mb_04_connector::{Handler, HandlerResult, OpContext};
use shared_types::{Request, Response, StatusCode, TracedError};
use std::sync::Weak;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Endpoint {
    Broadcast,
    Rescue,
}

pub(crate) struct PeerHandler {
    pub(crate) cache: Weak<CacheInner>,
    pub(crate) endpoint: Endpoint,
}

#[async_trait]
impl Handler for PeerHandler {
    async fn handle(&self, _ctx: OpContext, req: Request) -> HandlerResult {
        let cache = self
            .cache
            .upgrade()
            .ok_or_else(|| TracedError::with_code(503, "cache closed"))?;

        // Only the other replicas of the same host are peers
        let (from_host, from_id) = {
            let frame = req.frame();
            (
                frame.from_host().unwrap_or_default().to_string(),
                frame.from_id().unwrap_or_default().to_string(),
            )
        };
        if !from_host.eq_ignore_ascii_case(&cache.host) || from_id == cache.id {
            return Ok(Response::new(StatusCode::NOT_FOUND));
        }

        let key = req.query_arg("key").unwrap_or_default();
        match self.endpoint {
            Endpoint::Rescue => {
                if key.is_empty() {
                    return Err(TracedError::with_code(400, "missing key"));
                }
                cache.local.lock().store(&key, req.body);
                Ok(Response::new(StatusCode::OK))
            }
            Endpoint::Broadcast => {
                let action = req.query_arg("do").unwrap_or_default();
                debug!(action = %action, key = %key, peer = %from_id, "Cache peer action");
                match action.as_str() {
                    "load" => {
                        let copy = cache.local.lock().load(&key, false);
                        match copy {
                            Some(value) => Ok(Response::ok(value)),
                            None => Ok(Response::new(StatusCode::NOT_FOUND)),
                        }
                    }
                    "store" => {
                        cache.admit(&key, req.body);
                        Ok(Response::new(StatusCode::OK))
                    }
                    "delete" => {
                        cache.local.lock().delete(&key);
                        Ok(Response::new(StatusCode::OK))
                    }
                    "clear" => {
                        cache.local.lock().clear();
                        Ok(Response::new(StatusCode::OK))
                    }
                    other => Err(TracedError::with_code(400, format!("unknown cache action {other:?}"))),
                }
            }
        }
    }
}
