//! # Connector
//!
//! The [`Connector`] is the single facade of a service instance: identity,
//! lifecycle, configuration, subscriptions, publishing, tickers, tasks and
//! resources. It is cheap to clone; clones share the same instance.
//!
//! Identity and tunables can only be changed before startup.

use crate::config::{Configs, EnvSource};
use crate::domain::{Deployment, Handler, InFlightRequests, Job, KnownResponders, OpContext, Queue};
use crate::error::ConnectorError;
use crate::ops::OpCounter;
use crate::tickers::Ticker;
use mb_01_subjects::PathSpec;
use mb_02_fragmentation::{max_fragment_size, DefragStore, DEFAULT_MAX_FRAGMENTS};
use mb_03_selective_tracing::TraceSelector;
use mb_telemetry::metrics::PENDING_OPERATIONS;
use parking_lot::{Mutex, RwLock};
use rand::distributions::Alphanumeric;
use rand::Rng;
use shared_bus::{Bus, DEFAULT_MAX_PAYLOAD};
use shared_types::{
    validate_connector_host, validate_plane, Method, Request, Response, DEFAULT_PLANE,
};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Default latency allowance of one bus round trip.
pub const DEFAULT_NETWORK_HOP: Duration = Duration::from_millis(250);

/// Default time budget of a request made with a context without deadline.
pub const DEFAULT_TIME_BUDGET: Duration = Duration::from_secs(20);

/// Default limit of nested requests.
pub const DEFAULT_MAX_CALL_DEPTH: u32 = 64;

/// Default bound of each startup and shutdown callback.
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(60);

/// How long shutdown waits for operations in flight.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(8);

/// Length of the random instance id.
pub const INSTANCE_ID_LEN: usize = 10;

pub(crate) type ConfigCallback = Arc<dyn Fn(&[String]) + Send + Sync>;

pub(crate) struct Identity {
    pub host: String,
    pub description: String,
    pub deployment: Option<Deployment>,
    pub plane: Option<String>,
    pub version: u32,
}

pub(crate) struct Tunables {
    pub network_hop: Duration,
    pub default_time_budget: Duration,
    pub max_call_depth: u32,
    pub max_fragment_size: Option<usize>,
    pub max_fragments: u32,
    pub callback_timeout: Duration,
}

/// Settings that are fixed for the duration of one run, resolved at
/// startup.
#[derive(Debug, Clone)]
pub(crate) struct Resolved {
    pub host: String,
    pub plane: String,
    pub deployment: Deployment,
    pub version: u32,
    pub network_hop: Duration,
    pub default_time_budget: Duration,
    pub max_call_depth: u32,
    pub max_fragment_size: usize,
    pub max_fragments: u32,
}

/// A subscription endpoint and the routing data its delivery loops share.
pub(crate) struct Route {
    pub key: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub spec: PathSpec,
    /// `None` accepts any method.
    pub method: Option<Method>,
    pub queue: Queue,
    pub handler: Arc<dyn Handler>,
}

impl Route {
    /// Queue group on the bus, `None` for fan-out.
    pub fn bus_queue(&self) -> Option<String> {
        match &self.queue {
            Queue::Default => Some(self.host.clone()),
            Queue::None => None,
            Queue::Named(q) => Some(q.clone()),
        }
    }

    /// Queue name reported in acks and responses.
    pub fn reply_queue(&self, id: &str) -> String {
        match &self.queue {
            Queue::Default => self.host.clone(),
            Queue::None => mb_01_subjects::instance_host(id, &self.host),
            Queue::Named(q) => q.clone(),
        }
    }
}

pub(crate) struct Subscription {
    pub route: Arc<Route>,
    pub workers: Vec<JoinHandle<()>>,
}

pub(crate) struct Inner {
    pub id: String,
    pub identity: RwLock<Identity>,
    pub tunables: RwLock<Tunables>,
    pub resolved: RwLock<Option<Resolved>>,
    pub started: AtomicBool,
    pub lifecycle: tokio::sync::Mutex<()>,
    pub bus: RwLock<Option<Arc<dyn Bus>>>,
    pub injected_bus: Mutex<Option<Arc<dyn Bus>>>,
    pub subs: Mutex<HashMap<String, Subscription>>,
    pub pending_ops: Arc<OpCounter>,
    pub tasks: Arc<OpCounter>,
    pub lifetime: watch::Sender<bool>,
    pub requests: Arc<InFlightRequests>,
    pub known_responders: KnownResponders,
    pub req_defrags: RwLock<Arc<DefragStore<Request>>>,
    pub res_defrags: RwLock<Arc<DefragStore<Response>>>,
    pub workers: Mutex<Vec<JoinHandle<()>>>,
    pub configs: Mutex<Configs>,
    pub env: RwLock<EnvSource>,
    pub config_callbacks: Mutex<Vec<ConfigCallback>>,
    pub tickers: Mutex<BTreeMap<String, Ticker>>,
    pub on_startup: Mutex<Vec<Arc<dyn Job>>>,
    pub on_shutdown: Mutex<Vec<Arc<dyn Job>>>,
    pub trace_selector: RwLock<Option<Arc<dyn TraceSelector>>>,
    pub resources: RwLock<Option<PathBuf>>,
}

impl Inner {
    pub fn resolved(&self) -> Option<Resolved> {
        self.resolved.read().clone()
    }

    pub fn bus(&self) -> Option<Arc<dyn Bus>> {
        self.bus.read().clone()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn lifetime_context(&self) -> OpContext {
        OpContext::with_lifetime(self.lifetime.subscribe())
    }
}

/// A microservice instance attached to the bus.
#[derive(Clone)]
pub struct Connector {
    pub(crate) inner: Arc<Inner>,
}

impl Connector {
    /// A connector for `host`. The host may be left empty and set later
    /// with [`Connector::set_host_name`].
    pub fn new(host: &str) -> Self {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(INSTANCE_ID_LEN)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        let (lifetime, _) = watch::channel(false);
        let inner = Inner {
            id,
            identity: RwLock::new(Identity {
                host: host.to_ascii_lowercase(),
                description: String::new(),
                deployment: None,
                plane: None,
                version: 0,
            }),
            tunables: RwLock::new(Tunables {
                network_hop: DEFAULT_NETWORK_HOP,
                default_time_budget: DEFAULT_TIME_BUDGET,
                max_call_depth: DEFAULT_MAX_CALL_DEPTH,
                max_fragment_size: None,
                max_fragments: DEFAULT_MAX_FRAGMENTS,
                callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
            }),
            resolved: RwLock::new(None),
            started: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(()),
            bus: RwLock::new(None),
            injected_bus: Mutex::new(None),
            subs: Mutex::new(HashMap::new()),
            pending_ops: Arc::new(OpCounter::with_gauge(PENDING_OPERATIONS.clone())),
            tasks: Arc::new(OpCounter::new()),
            lifetime,
            requests: Arc::new(InFlightRequests::new()),
            known_responders: KnownResponders::new(),
            req_defrags: RwLock::new(Arc::new(DefragStore::new(DEFAULT_NETWORK_HOP))),
            res_defrags: RwLock::new(Arc::new(DefragStore::new(DEFAULT_NETWORK_HOP))),
            workers: Mutex::new(Vec::new()),
            configs: Mutex::new(Configs::new()),
            env: RwLock::new(EnvSource::new()),
            config_callbacks: Mutex::new(Vec::new()),
            tickers: Mutex::new(BTreeMap::new()),
            on_startup: Mutex::new(Vec::new()),
            on_shutdown: Mutex::new(Vec::new()),
            trace_selector: RwLock::new(None),
            resources: RwLock::new(None),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    fn ensure_not_started(&self) -> Result<(), ConnectorError> {
        if self.inner.is_started() {
            return Err(ConnectorError::AlreadyStarted);
        }
        Ok(())
    }

    /// Random instance id, stable for the life of the process.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn host(&self) -> String {
        self.inner.identity.read().host.clone()
    }

    pub fn set_host_name(&self, host: &str) -> Result<(), ConnectorError> {
        self.ensure_not_started()?;
        let host = validate_connector_host(host)
            .map_err(|_| ConnectorError::InvalidHost(host.to_string()))?;
        self.inner.identity.write().host = host;
        Ok(())
    }

    pub fn description(&self) -> String {
        self.inner.identity.read().description.clone()
    }

    pub fn set_description(&self, description: &str) -> Result<(), ConnectorError> {
        self.ensure_not_started()?;
        self.inner.identity.write().description = description.to_string();
        Ok(())
    }

    /// Deployment in effect. Before startup this is the explicitly set
    /// deployment, or `LOCAL`.
    pub fn deployment(&self) -> Deployment {
        if let Some(resolved) = self.inner.resolved() {
            return resolved.deployment;
        }
        self.inner.identity.read().deployment.unwrap_or_default()
    }

    pub fn set_deployment(&self, deployment: Deployment) -> Result<(), ConnectorError> {
        self.ensure_not_started()?;
        self.inner.identity.write().deployment = Some(deployment);
        Ok(())
    }

    /// Plane in effect. Before startup this is the explicitly set plane,
    /// or `microbus`.
    pub fn plane(&self) -> String {
        if let Some(resolved) = self.inner.resolved() {
            return resolved.plane;
        }
        self.inner
            .identity
            .read()
            .plane
            .clone()
            .unwrap_or_else(|| DEFAULT_PLANE.to_string())
    }

    pub fn set_plane(&self, plane: &str) -> Result<(), ConnectorError> {
        self.ensure_not_started()?;
        validate_plane(plane).map_err(|_| ConnectorError::InvalidPlane(plane.to_string()))?;
        self.inner.identity.write().plane = Some(plane.to_string());
        Ok(())
    }

    pub fn version(&self) -> u32 {
        self.inner.identity.read().version
    }

    pub fn set_version(&self, version: u32) -> Result<(), ConnectorError> {
        self.ensure_not_started()?;
        self.inner.identity.write().version = version;
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.inner.is_started()
    }

    /// Attach to this bus at startup instead of connecting per the `NATS`
    /// config.
    pub fn set_bus(&self, bus: Arc<dyn Bus>) -> Result<(), ConnectorError> {
        self.ensure_not_started()?;
        *self.inner.injected_bus.lock() = Some(bus);
        Ok(())
    }

    /// Source of environment-backed configuration. Defaults to an empty
    /// source; the host binary installs [`EnvSource::from_process`].
    pub fn set_env(&self, env: EnvSource) -> Result<(), ConnectorError> {
        self.ensure_not_started()?;
        *self.inner.env.write() = env;
        Ok(())
    }

    pub fn network_hop(&self) -> Duration {
        self.inner.tunables.read().network_hop
    }

    pub fn set_network_hop(&self, hop: Duration) -> Result<(), ConnectorError> {
        self.ensure_not_started()?;
        self.inner.tunables.write().network_hop = hop;
        Ok(())
    }

    pub fn default_time_budget(&self) -> Duration {
        self.inner.tunables.read().default_time_budget
    }

    pub fn set_default_time_budget(&self, budget: Duration) -> Result<(), ConnectorError> {
        self.ensure_not_started()?;
        self.inner.tunables.write().default_time_budget = budget;
        Ok(())
    }

    pub fn max_call_depth(&self) -> u32 {
        self.inner.tunables.read().max_call_depth
    }

    pub fn set_max_call_depth(&self, depth: u32) -> Result<(), ConnectorError> {
        self.ensure_not_started()?;
        self.inner.tunables.write().max_call_depth = depth;
        Ok(())
    }

    /// Largest body per fragment. Derived from the bus max payload unless
    /// set explicitly.
    pub fn max_fragment_size(&self) -> usize {
        if let Some(resolved) = self.inner.resolved() {
            return resolved.max_fragment_size;
        }
        self.inner
            .tunables
            .read()
            .max_fragment_size
            .unwrap_or_else(|| max_fragment_size(DEFAULT_MAX_PAYLOAD))
    }

    pub fn set_max_fragment_size(&self, size: usize) -> Result<(), ConnectorError> {
        self.ensure_not_started()?;
        self.inner.tunables.write().max_fragment_size = Some(size.max(1));
        Ok(())
    }

    /// Fragment count above which an incoming message is refused with 413.
    pub fn max_fragments(&self) -> u32 {
        self.inner.tunables.read().max_fragments
    }

    pub fn set_max_fragments(&self, limit: u32) -> Result<(), ConnectorError> {
        self.ensure_not_started()?;
        self.inner.tunables.write().max_fragments = limit.max(1);
        Ok(())
    }

    pub fn set_callback_timeout(&self, timeout: Duration) -> Result<(), ConnectorError> {
        self.ensure_not_started()?;
        self.inner.tunables.write().callback_timeout = timeout;
        Ok(())
    }

    /// Install the selector that `GET :888/trace` elects traces in.
    pub fn set_trace_selector(&self, selector: Arc<dyn TraceSelector>) {
        *self.inner.trace_selector.write() = Some(selector);
    }

    /// Handler dispatches and ticks in flight.
    pub fn pending_ops(&self) -> usize {
        self.inner.pending_ops.count()
    }

    /// Requests awaiting responses.
    pub fn in_flight_requests(&self) -> usize {
        self.inner.requests.pending_count()
    }

    /// A context bound only by the connector lifetime.
    pub fn lifetime_context(&self) -> OpContext {
        self.inner.lifetime_context()
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("host", &self.host())
            .field("id", &self.inner.id)
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}
