//! # Lifecycle
//!
//! Startup resolves the identity and configuration of the connector,
//! attaches to the bus, activates the subscriptions and then runs the
//! startup callbacks. Shutdown undoes it in reverse:
//!
//! 1. Unsubscribe, so no new requests arrive
//! 2. Wait up to [`DRAIN_TIMEOUT`] for handlers and ticks in flight
//! 3. Cancel the lifetime context and stop the tickers
//! 4. Run the shutdown callbacks
//! 5. Wait up to [`DRAIN_TIMEOUT`] for background tasks
//! 6. Detach from the bus
//!
//! A failing startup callback shuts the connector down again.

use crate::config::ConfigSpec;
use crate::connector::{Connector, Inner, Resolved, DRAIN_TIMEOUT};
use crate::domain::{run_guarded, Deployment, Job, OpContext};
use crate::error::{ConfigError, ConnectorError};
use crate::publish::response_loop;
use mb_01_subjects::response_subject;
use mb_02_fragmentation::{max_fragment_size, DefragStore};
use shared_bus::{Bus, NatsOptions};
use shared_types::{validate_connector_host, validate_plane, TracedError, DEFAULT_PLANE};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Config names the connector itself resolves from the environment.
pub const ENV_DEPLOYMENT: &str = "Deployment";
pub const ENV_PLANE: &str = "Plane";
pub const ENV_NATS: &str = "NATS";
pub const ENV_NATS_USER: &str = "NATSUser";
pub const ENV_NATS_PASSWORD: &str = "NATSPassword";
pub const ENV_NATS_TOKEN: &str = "NATSToken";

async fn defrag_gc(inner: Weak<Inner>, period: Duration) {
    let mut timer = tokio::time::interval(period.max(Duration::from_millis(1)));
    loop {
        timer.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let requests = inner.req_defrags.read().clone().gc();
        let responses = inner.res_defrags.read().clone().gc();
        if requests + responses > 0 {
            debug!(requests, responses, "Discarded incomplete fragmented messages");
        }
    }
}

async fn run_callback(job: Arc<dyn Job>, ctx: OpContext) -> Result<(), TracedError> {
    let job_ctx = ctx.clone();
    run_guarded(&ctx, async move { job.run(job_ctx).await }).await
}

impl Connector {
    /// Register a callback run after the connector started. It may publish
    /// and receives a context bounded by the callback timeout.
    pub fn on_startup<J: Job>(&self, job: J) -> Result<(), ConnectorError> {
        if self.is_started() {
            return Err(ConnectorError::AlreadyStarted);
        }
        self.inner.on_startup.lock().push(Arc::new(job));
        Ok(())
    }

    /// Register a callback run during shutdown, after handlers drained.
    pub fn on_shutdown<J: Job>(&self, job: J) -> Result<(), ConnectorError> {
        if self.is_started() {
            return Err(ConnectorError::AlreadyStarted);
        }
        self.inner.on_shutdown.lock().push(Arc::new(job));
        Ok(())
    }

    /// Start the connector.
    pub async fn startup(&self) -> Result<(), ConnectorError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.is_started() {
            return Err(ConnectorError::AlreadyStarted);
        }
        let (resolved, bus) = self.resolve_settings().await?;

        if let Err(e) = self.attach(&bus, &resolved).await {
            self.detach().await;
            return Err(e);
        }
        self.inner.started.store(true, std::sync::atomic::Ordering::Release);
        info!(
            host = %resolved.host,
            id = %self.inner.id,
            plane = %resolved.plane,
            deployment = %resolved.deployment,
            version = resolved.version,
            configs = ?self.inner.configs.lock().describe(),
            "Connector started"
        );

        let timeout = self.inner.tunables.read().callback_timeout;
        let callbacks = self.inner.on_startup.lock().clone();
        for callback in callbacks {
            let ctx = self.lifetime_context().with_timeout(timeout);
            if let Err(e) = run_callback(callback, ctx).await {
                error!(host = %resolved.host, error = %e, "Startup callback failed");
                if let Err(shutdown_err) = self.shutdown_locked().await {
                    warn!(error = %shutdown_err, "Shutdown after failed startup reported an error");
                }
                return Err(ConnectorError::Callback(e));
            }
        }
        self.inner.start_tickers();
        Ok(())
    }

    /// Resolve identity, configs and the bus for this run.
    async fn resolve_settings(&self) -> Result<(Resolved, Arc<dyn Bus>), ConnectorError> {
        let (host, explicit_deployment, explicit_plane, version) = {
            let identity = self.inner.identity.read();
            (
                identity.host.clone(),
                identity.deployment,
                identity.plane.clone(),
                identity.version,
            )
        };
        if host.is_empty() {
            return Err(ConnectorError::MissingHostName);
        }
        let host = validate_connector_host(&host).map_err(|_| ConnectorError::InvalidHost(host.clone()))?;
        let env = self.inner.env.read().clone();

        let deployment = match explicit_deployment {
            Some(deployment) => deployment,
            None => match env.lookup(&host, ENV_DEPLOYMENT) {
                Some(value) if !value.trim().is_empty() => value.parse()?,
                _ => Deployment::default(),
            },
        };
        let plane = explicit_plane
            .or_else(|| env.lookup(&host, ENV_PLANE).filter(|p| !p.is_empty()))
            .unwrap_or_else(|| DEFAULT_PLANE.to_string());
        validate_plane(&plane).map_err(|_| ConnectorError::InvalidPlane(plane.clone()))?;

        self.inner.configs.lock().resolve(&host, &env)?;

        let injected = self.inner.injected_bus.lock().clone();
        let bus: Arc<dyn Bus> = match injected {
            Some(bus) => bus,
            None => {
                let url = env.lookup(&host, ENV_NATS).unwrap_or_default();
                let options = NatsOptions {
                    user: env.lookup(&host, ENV_NATS_USER),
                    password: env.lookup(&host, ENV_NATS_PASSWORD),
                    token: env.lookup(&host, ENV_NATS_TOKEN),
                    name: Some(format!("{}.{}", self.inner.id, host)),
                    ..NatsOptions::default()
                };
                shared_bus::connect(&url, options).await?
            }
        };

        let resolved = {
            let tunables = self.inner.tunables.read();
            Resolved {
                host,
                plane,
                deployment,
                version,
                network_hop: tunables.network_hop,
                default_time_budget: tunables.default_time_budget,
                max_call_depth: tunables.max_call_depth,
                max_fragment_size: tunables
                    .max_fragment_size
                    .unwrap_or_else(|| max_fragment_size(bus.max_payload())),
                max_fragments: tunables.max_fragments,
            }
        };
        *self.inner.bus.write() = Some(Arc::clone(&bus));
        *self.inner.resolved.write() = Some(resolved.clone());
        Ok((resolved, bus))
    }

    /// Subscribe the response subject and every endpoint.
    async fn attach(&self, bus: &Arc<dyn Bus>, resolved: &Resolved) -> Result<(), ConnectorError> {
        let hop = resolved.network_hop;
        let limit = resolved.max_fragments;
        *self.inner.req_defrags.write() = Arc::new(DefragStore::new(hop).with_max_fragments(limit));
        *self.inner.res_defrags.write() = Arc::new(DefragStore::new(hop).with_max_fragments(limit));
        self.inner.lifetime.send_replace(false);

        let subject = response_subject(&resolved.plane, &resolved.host, &self.inner.id);
        let responses = bus.subscribe(&subject, None).await?;
        {
            let mut workers = self.inner.workers.lock();
            workers.push(tokio::spawn(response_loop(Arc::downgrade(&self.inner), responses)));
            workers.push(tokio::spawn(defrag_gc(Arc::downgrade(&self.inner), hop / 2)));
        }

        self.inner.install_control()?;
        self.inner.activate_all().await
    }

    /// Drop every bus attachment of this run.
    async fn detach(&self) {
        for sub in self.inner.subs.lock().values_mut() {
            for worker in sub.workers.drain(..) {
                worker.abort();
            }
        }
        for worker in self.inner.workers.lock().drain(..) {
            worker.abort();
        }
        let bus = self.inner.bus.write().take();
        if let Some(bus) = bus {
            bus.close().await;
        }
        *self.inner.resolved.write() = None;
    }

    /// Stop the connector.
    ///
    /// Returns the first shutdown callback error, after completing the
    /// shutdown regardless.
    pub async fn shutdown(&self) -> Result<(), ConnectorError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.shutdown_locked().await
    }

    async fn shutdown_locked(&self) -> Result<(), ConnectorError> {
        if !self.is_started() {
            return Err(ConnectorError::NotStarted);
        }
        let host = self.host();
        self.unsubscribe_all().await;

        if !self.inner.pending_ops.wait_idle(DRAIN_TIMEOUT).await {
            warn!(host = %host, pending = self.inner.pending_ops.count(), "Shutting down with operations in flight");
        }
        self.inner.lifetime.send_replace(true);
        self.inner.stop_tickers();

        let timeout = self.inner.tunables.read().callback_timeout;
        let callbacks = self.inner.on_shutdown.lock().clone();
        let mut first_err = None;
        for callback in callbacks {
            let ctx = OpContext::background().with_timeout(timeout);
            if let Err(e) = run_callback(callback, ctx).await {
                error!(host = %host, error = %e, "Shutdown callback failed");
                first_err.get_or_insert(e);
            }
        }

        if !self.inner.tasks.wait_idle(DRAIN_TIMEOUT).await {
            warn!(host = %host, tasks = self.inner.tasks.count(), "Shutting down with background tasks running");
        }
        self.inner.started.store(false, std::sync::atomic::Ordering::Release);
        self.detach().await;
        info!(host = %host, id = %self.inner.id, "Connector stopped");

        match first_err {
            Some(e) => Err(ConnectorError::Callback(e)),
            None => Ok(()),
        }
    }

    /// Define a config property. Only before startup.
    pub fn define_config(&self, name: &str, spec: ConfigSpec) -> Result<(), ConnectorError> {
        if self.is_started() {
            return Err(ConnectorError::AlreadyStarted);
        }
        self.inner.configs.lock().define(name, spec)?;
        Ok(())
    }

    /// Current value of a config property, `None` if undefined or unset
    /// without a default.
    pub fn config(&self, name: &str) -> Option<String> {
        self.inner.configs.lock().get(name)
    }

    /// Set a config property explicitly, overriding the environment.
    ///
    /// Once started this is only allowed in the `LOCAL` and `TESTING`
    /// deployments, and fires the config change callbacks.
    pub fn set_config(&self, name: &str, value: &str) -> Result<(), ConnectorError> {
        let started = self.is_started();
        if started && !self.deployment().allows_config_setters() {
            return Err(ConfigError::Locked(name.to_string()).into());
        }
        let changed = self.inner.configs.lock().set(name, value)?;
        if started && changed {
            self.fire_config_changed(&[name.to_string()]);
        }
        Ok(())
    }

    /// Register a callback that receives the names of changed configs.
    pub fn on_config_changed<F>(&self, callback: F)
    where
        F: Fn(&[String]) + Send + Sync + 'static,
    {
        self.inner.config_callbacks.lock().push(Arc::new(callback));
    }

    /// Re-read the environment and re-resolve every config that was not
    /// set explicitly. Returns the names of the changed configs.
    pub fn refresh_config(&self) -> Result<Vec<String>, ConnectorError> {
        let env = self.inner.env.read().reloaded()?;
        *self.inner.env.write() = env.clone();
        let changed = self.inner.configs.lock().resolve(&self.host(), &env)?;
        if !changed.is_empty() {
            info!(host = %self.host(), changed = ?changed, "Config refreshed");
            if self.is_started() {
                self.fire_config_changed(&changed);
            }
        }
        Ok(changed)
    }

    fn fire_config_changed(&self, changed: &[String]) {
        let callbacks = self.inner.config_callbacks.lock().clone();
        for callback in callbacks {
            callback(changed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvSource;
    use crate::domain::PublishOptions;
    use parking_lot::Mutex;
    use shared_bus::InMemoryBus;

    fn testing_connector(host: &str, bus: &InMemoryBus) -> Connector {
        let con = Connector::new(host);
        con.set_deployment(Deployment::Testing).unwrap();
        con.set_bus(Arc::new(bus.attach())).unwrap();
        con
    }

    #[tokio::test]
    async fn test_startup_requires_host() {
        let con = Connector::new("");
        assert!(matches!(con.startup().await, Err(ConnectorError::MissingHostName)));
        assert!(matches!(con.shutdown().await, Err(ConnectorError::NotStarted)));
    }

    #[tokio::test]
    async fn test_startup_and_shutdown() {
        let bus = InMemoryBus::new();
        let con = testing_connector("life.example", &bus);
        let log = Arc::new(Mutex::new(Vec::new()));

        let started = Arc::clone(&log);
        con.on_startup(move |_ctx: OpContext| {
            let started = Arc::clone(&started);
            async move {
                started.lock().push("startup");
                Ok::<_, TracedError>(())
            }
        })
        .unwrap();
        let stopped = Arc::clone(&log);
        con.on_shutdown(move |ctx: OpContext| {
            let stopped = Arc::clone(&stopped);
            async move {
                assert!(!ctx.is_shutting_down());
                stopped.lock().push("shutdown");
                Ok::<_, TracedError>(())
            }
        })
        .unwrap();

        con.startup().await.unwrap();
        assert!(con.is_started());
        assert!(matches!(con.startup().await, Err(ConnectorError::AlreadyStarted)));
        assert!(matches!(con.set_host_name("x.example"), Err(ConnectorError::AlreadyStarted)));

        let res = con
            .request(&OpContext::background(), PublishOptions::get("https://life.example:888/ping"))
            .await
            .unwrap();
        assert_eq!(res.body, br#"{"pong":0}"#);

        con.shutdown().await.unwrap();
        assert!(!con.is_started());
        assert_eq!(*log.lock(), vec!["startup", "shutdown"]);
    }

    #[tokio::test]
    async fn test_failed_startup_callback_shuts_down() {
        let bus = InMemoryBus::new();
        let con = testing_connector("fail.example", &bus);
        con.on_startup(|_ctx: OpContext| async {
            Err(TracedError::with_code(500, "nope"))
        })
        .unwrap();
        let err = con.startup().await.unwrap_err();
        assert!(matches!(err, ConnectorError::Callback(ref e) if e.message() == "nope"));
        assert!(!con.is_started());
    }

    #[tokio::test]
    async fn test_deployment_and_plane_from_env() {
        let bus = InMemoryBus::new();
        let con = Connector::new("env.example");
        con.set_bus(Arc::new(bus.attach())).unwrap();
        con.set_env(EnvSource::from_vars([
            ("MICROBUS_ALL_DEPLOYMENT", "lab"),
            ("MICROBUS_ENVEXAMPLE_PLANE", "blue"),
        ]))
        .unwrap();
        con.startup().await.unwrap();
        assert_eq!(con.deployment(), Deployment::Lab);
        assert_eq!(con.plane(), "blue");
        con.shutdown().await.unwrap();
        assert_eq!(con.plane(), DEFAULT_PLANE);
    }

    #[tokio::test]
    async fn test_config_setter_rules() {
        let bus = InMemoryBus::new();
        let con = Connector::new("cfg.example");
        con.set_bus(Arc::new(bus.attach())).unwrap();
        con.set_deployment(Deployment::Lab).unwrap();
        con.set_env(EnvSource::from_vars([("MICROBUS_ALL_COLOR", "blue")]))
            .unwrap();
        con.define_config("Color", ConfigSpec::new().default_value("red"))
            .unwrap();
        assert_eq!(con.config("color").as_deref(), Some("red"));
        con.startup().await.unwrap();
        assert_eq!(con.config("color").as_deref(), Some("blue"));
        assert!(matches!(
            con.set_config("color", "green"),
            Err(ConnectorError::Config(ConfigError::Locked(_)))
        ));
        assert!(matches!(
            con.define_config("Size", ConfigSpec::new()),
            Err(ConnectorError::AlreadyStarted)
        ));
        con.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_config_callbacks_fire_when_started() {
        let bus = InMemoryBus::new();
        let con = testing_connector("cb.example", &bus);
        con.define_config("Level", ConfigSpec::new().validation("int").unwrap())
            .unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        con.on_config_changed(move |changed| sink.lock().extend_from_slice(changed));

        con.set_config("level", "1").unwrap();
        assert!(seen.lock().is_empty());

        con.startup().await.unwrap();
        con.set_config("level", "2").unwrap();
        con.set_config("level", "2").unwrap();
        assert!(con.set_config("level", "two").is_err());
        assert_eq!(*seen.lock(), vec!["level".to_string()]);
        con.shutdown().await.unwrap();
    }
}
