//! Connector builders shared by the scenarios.

use mb_04_connector::{Connector, Deployment, OpContext};
use shared_bus::InMemoryBus;
use std::sync::Arc;

/// A connector for `host` attached to `bus`, in the `TESTING` deployment.
pub fn testing_connector(host: &str, bus: &InMemoryBus) -> Connector {
    let con = Connector::new(host);
    if let Err(e) = con.set_deployment(Deployment::Testing) {
        panic!("setting deployment: {e}");
    }
    attach(&con, bus);
    con
}

/// A connector for `host` attached to `bus`, in the `LOCAL` deployment,
/// where tickers run.
pub fn local_connector(host: &str, bus: &InMemoryBus) -> Connector {
    let con = Connector::new(host);
    attach(&con, bus);
    con
}

fn attach(con: &Connector, bus: &InMemoryBus) {
    if let Err(e) = con.set_bus(Arc::new(bus.attach())) {
        panic!("attaching bus: {e}");
    }
}

/// Shut down every connector, in order.
pub async fn shutdown_all(connectors: &[Connector]) {
    for con in connectors {
        if let Err(e) = con.shutdown().await {
            panic!("shutting down {}: {e}", con.host());
        }
    }
}

pub fn ctx() -> OpContext {
    OpContext::background()
}
