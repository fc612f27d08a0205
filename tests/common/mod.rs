//! Shared utilities for cluster integration tests.
//!
//! Spins up real nodes on ephemeral ports, all sharing one SQLite mapping
//! store, and talks to them over HTTP.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use sticky_cluster::cluster::{Coordinator, StartMode, StickySpec};
use sticky_cluster::config::{NodeConfig, RouteConfig};
use sticky_cluster::http::HttpServer;
use sticky_cluster::lifecycle::Shutdown;
use sticky_cluster::resilience::RetryPolicy;
use sticky_cluster::store::{open_store, DatabaseConfig};

/// One in-process cluster node serving on an ephemeral port.
pub struct TestNode {
    pub address: String,
    pub coordinator: Arc<Coordinator>,
    shutdown: Shutdown,
}

impl TestNode {
    pub fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.address, path_and_query)
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// A single `/publish` route, sticky on the `channel` parameter.
pub fn channel_route() -> Vec<RouteConfig> {
    vec![RouteConfig {
        name: "publish".to_string(),
        path_prefix: "/publish".to_string(),
        sticky: Some(StickySpec::Param("channel".to_string())),
    }]
}

/// Start a node against the shared database and serve it in the background.
pub async fn spawn_node(db: &Path, routes: Vec<RouteConfig>) -> TestNode {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let mut config = NodeConfig::default();
    config.listener.bind_address = address.clone();
    config.cluster.advertise_address = Some(address.clone());
    config.database = DatabaseConfig {
        path: db.to_path_buf(),
        ..DatabaseConfig::default()
    };
    config.routes = routes;

    let store = open_store(&config.database).unwrap();
    let coordinator = Arc::new(
        Coordinator::join(
            store,
            &config.cluster.server_type,
            config.advertise_address(),
            StartMode::Fresh,
            RetryPolicy::new(3, Duration::from_millis(10)),
        )
        .unwrap(),
    );

    let server = HttpServer::new(&config, Some(coordinator.clone()));
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, &server_shutdown).await;
    });

    TestNode {
        address,
        coordinator,
        shutdown,
    }
}

#[allow(dead_code)]
pub async fn get_json(client: &reqwest::Client, url: &str) -> serde_json::Value {
    let res = client.get(url).send().await.unwrap();
    assert!(res.status().is_success(), "GET {url} failed: {}", res.status());
    res.json().await.unwrap()
}
