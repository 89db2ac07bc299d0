//! # Subscriptions
//!
//! A subscription binds a handler to `host:port/path`. While the connector
//! is started each subscription holds two bus subscriptions: the shared
//! subject of the host, load balanced per the queue option, and the
//! instance subject `<id>.<host>` used to reach this replica directly.

use crate::connector::{Connector, Inner, Route, Subscription};
use crate::domain::{Handler, Queue, SubscribeOptions};
use crate::error::ConnectorError;
use crate::inbound;
use mb_01_subjects::{instance_host, subscription_subject, PathSpec};
use shared_types::{join_host_and_path, validate_host_name, ParsedUrl, UrlError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Pause after bus subscription changes, letting the broker catch up.
const SETTLE_DELAY: Duration = Duration::from_millis(20);

/// Location of a subscription.
pub(crate) struct Endpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Endpoint {
    pub fn parse(connector_host: &str, path: &str) -> Result<Self, ConnectorError> {
        let url = join_host_and_path(connector_host, path);
        let parsed = ParsedUrl::parse(&url).map_err(|e| match e {
            UrlError::InvalidPort(_) => ConnectorError::InvalidPort(path.to_string()),
            UrlError::MissingHost(_) if connector_host.is_empty() => {
                ConnectorError::MissingHostName
            }
            _ => ConnectorError::InvalidUrl(path.to_string()),
        })?;
        if !parsed.query.is_empty() {
            return Err(ConnectorError::InvalidPath(path.to_string()));
        }
        let host = validate_host_name(&parsed.host)
            .map_err(|_| ConnectorError::InvalidHost(parsed.host.clone()))?;
        Ok(Self {
            host,
            port: parsed.port,
            path: parsed.path,
        })
    }

    pub fn key(&self) -> String {
        format!("{}:{}{}", self.host, self.port, self.path)
    }
}

fn validate_queue(queue: &Queue) -> Result<(), ConnectorError> {
    if let Queue::Named(name) = queue {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        if !valid {
            return Err(ConnectorError::InvalidQueue(name.clone()));
        }
    }
    Ok(())
}

impl Inner {
    pub(crate) fn build_route(
        &self,
        path: &str,
        handler: Arc<dyn Handler>,
        options: SubscribeOptions,
    ) -> Result<Route, ConnectorError> {
        let connector_host = self.identity.read().host.clone();
        let endpoint = Endpoint::parse(&connector_host, path)?;
        let spec = PathSpec::parse(&endpoint.path)
            .map_err(|_| ConnectorError::InvalidPath(path.to_string()))?;
        validate_queue(&options.queue)?;
        Ok(Route {
            key: endpoint.key(),
            host: endpoint.host,
            port: endpoint.port,
            path: endpoint.path,
            spec,
            method: options.method,
            queue: options.queue,
            handler,
        })
    }

    /// Attach the bus subscriptions of a route and start their delivery
    /// loops.
    pub(crate) async fn activate(
        self: &Arc<Self>,
        route: &Arc<Route>,
    ) -> Result<Vec<JoinHandle<()>>, ConnectorError> {
        let (Some(bus), Some(resolved)) = (self.bus(), self.resolved()) else {
            return Err(ConnectorError::NotStarted);
        };
        let shared = subscription_subject(&resolved.plane, &route.host, route.port, &route.path)
            .map_err(|_| ConnectorError::InvalidPath(route.path.clone()))?;
        let direct = subscription_subject(
            &resolved.plane,
            &instance_host(&self.id, &route.host),
            route.port,
            &route.path,
        )
        .map_err(|_| ConnectorError::InvalidPath(route.path.clone()))?;

        let queue = route.bus_queue();
        let mut workers = Vec::with_capacity(2);
        for subject in [shared, direct] {
            match bus.subscribe(&subject, queue.as_deref()).await {
                Ok(sub) => {
                    debug!(subject = %subject, queue = ?queue, "Subscribed");
                    workers.push(tokio::spawn(inbound::deliver(
                        Arc::clone(self),
                        Arc::clone(route),
                        sub,
                    )));
                }
                Err(e) => {
                    for worker in &workers {
                        worker.abort();
                    }
                    return Err(e.into());
                }
            }
        }
        Ok(workers)
    }

    /// Record a route, replacing any route with the same key. Returns the
    /// replaced subscription.
    pub(crate) fn record(&self, route: Arc<Route>) -> Option<Subscription> {
        self.subs.lock().insert(
            route.key.clone(),
            Subscription {
                route,
                workers: Vec::new(),
            },
        )
    }

    /// Activate every recorded route that has no bus subscriptions yet.
    pub(crate) async fn activate_all(self: &Arc<Self>) -> Result<(), ConnectorError> {
        let idle: Vec<Arc<Route>> = self
            .subs
            .lock()
            .values()
            .filter(|s| s.workers.is_empty())
            .map(|s| Arc::clone(&s.route))
            .collect();
        for route in idle {
            let workers = self.activate(&route).await?;
            let mut subs = self.subs.lock();
            match subs.get_mut(&route.key) {
                Some(sub) if Arc::ptr_eq(&sub.route, &route) => sub.workers = workers,
                _ => workers.iter().for_each(JoinHandle::abort),
            }
        }
        Ok(())
    }
}

impl Subscription {
    fn deactivate(self) -> bool {
        let had_workers = !self.workers.is_empty();
        for worker in self.workers {
            worker.abort();
        }
        had_workers
    }
}

impl Connector {
    /// Bind a handler to a path.
    ///
    /// The path may be a full URL, `//host:port/path`, `:port/path`,
    /// `/path` or `path`; relative forms resolve against the connector's
    /// host. A trailing `/` subscribes to every sub-path and `{name}`,
    /// `{name+}` placeholders capture path arguments.
    pub async fn subscribe<H: Handler>(
        &self,
        path: &str,
        handler: H,
        options: SubscribeOptions,
    ) -> Result<(), ConnectorError> {
        self.subscribe_arc(path, Arc::new(handler), options).await
    }

    pub async fn subscribe_arc(
        &self,
        path: &str,
        handler: Arc<dyn Handler>,
        options: SubscribeOptions,
    ) -> Result<(), ConnectorError> {
        let route = Arc::new(self.inner.build_route(path, handler, options)?);
        if let Some(previous) = self.inner.record(Arc::clone(&route)) {
            previous.deactivate();
        }
        if !self.inner.is_started() {
            return Ok(());
        }
        match self.inner.activate(&route).await {
            Ok(workers) => {
                let mut subs = self.inner.subs.lock();
                match subs.get_mut(&route.key) {
                    Some(sub) if Arc::ptr_eq(&sub.route, &route) => sub.workers = workers,
                    _ => workers.iter().for_each(JoinHandle::abort),
                }
            }
            Err(e) => {
                self.inner.subs.lock().remove(&route.key);
                return Err(e);
            }
        }
        tokio::time::sleep(SETTLE_DELAY).await;
        info!(host = %self.host(), endpoint = %route.key, "Subscribed endpoint");
        Ok(())
    }

    /// Remove the subscription of a path. Unknown paths are ignored.
    pub async fn unsubscribe(&self, path: &str) -> Result<(), ConnectorError> {
        let endpoint = Endpoint::parse(&self.host(), path)?;
        let removed = self.inner.subs.lock().remove(&endpoint.key());
        if removed.is_some_and(Subscription::deactivate) {
            tokio::time::sleep(SETTLE_DELAY).await;
        }
        Ok(())
    }

    /// Remove every subscription.
    pub async fn unsubscribe_all(&self) {
        let removed: Vec<Subscription> = self.inner.subs.lock().drain().map(|(_, s)| s).collect();
        let mut any_active = false;
        for sub in removed {
            any_active |= sub.deactivate();
        }
        if any_active {
            tokio::time::sleep(SETTLE_DELAY).await;
        }
    }

    /// Canonical `host:port/path` keys of the current subscriptions.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.subs.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}
