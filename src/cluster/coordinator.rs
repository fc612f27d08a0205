//! Node-side coordination surface consumed by the HTTP layer.
//!
//! # Responsibilities
//! - Register this node in the mapping store at startup (fresh start wipes
//!   the previous run's row; restart recovers the persisted state blob)
//! - Resolve a route binding plus request parameters into an owner and a
//!   request-scoped write-back cache
//! - Explicit stickiness release and node status reporting

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::cluster::cache::StickyCache;
use crate::cluster::router::{ClusterRouter, EndpointIdentity, Resolution, RouteError};
use crate::cluster::sticky::{derive, Params, StickySpec};
use crate::resilience::RetryPolicy;
use crate::store::{MappingStore, StoreError};

/// How the node (re)joins the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Clean start: drop any previous row for this address, register anew.
    Fresh,
    /// Crash recovery: keep the existing row and its state blob.
    Restart,
}

/// A logical route as the coordinator sees it: identity plus sticky spec.
#[derive(Debug, Clone)]
pub struct RouteBinding {
    pub endpoint: EndpointIdentity,
    pub sticky: Option<StickySpec>,
}

/// What the HTTP layer needs to finish one request: where it runs, and the
/// cache to flush when handling completes locally.
pub struct RouteDecision {
    pub owner: String,
    pub is_local: bool,
    pub sticky_values: Vec<String>,
    pub cache: StickyCache,
}

/// Snapshot served by the cluster status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub address: String,
    pub server_type: String,
    pub server_id: i64,
    pub load: f64,
}

/// Per-node facade over store, router, deriver and cache construction.
pub struct Coordinator {
    store: Arc<dyn MappingStore>,
    router: ClusterRouter,
    self_address: String,
    server_type: String,
    self_id: i64,
}

impl Coordinator {
    /// Join the pool. Fresh mode clears the address's history first so a
    /// redeployed node never inherits stale mappings; restart mode keeps
    /// the row for state recovery.
    pub fn join(
        store: Arc<dyn MappingStore>,
        server_type: &str,
        self_address: &str,
        mode: StartMode,
        retry: RetryPolicy,
    ) -> Result<Self, StoreError> {
        let self_id = match mode {
            StartMode::Fresh => {
                store.remove_server(self_address)?;
                store.create_or_reset_server(self_address, server_type)?
            }
            StartMode::Restart => match store.server_id(self_address) {
                Ok(id) => id,
                // First boot flagged as restart: nothing to recover.
                Err(StoreError::NoSuchServer(_)) => {
                    store.create_or_reset_server(self_address, server_type)?
                }
                Err(err) => return Err(err),
            },
        };
        tracing::info!(
            address = %self_address,
            server_type = %server_type,
            server_id = self_id,
            mode = ?mode,
            "node registered in cluster store"
        );
        let router = ClusterRouter::new(
            store.clone(),
            server_type,
            self_address,
            self_id,
            retry,
        );
        Ok(Self {
            store,
            router,
            self_address: self_address.to_string(),
            server_type: server_type.to_string(),
            self_id,
        })
    }

    pub fn self_address(&self) -> &str {
        &self.self_address
    }

    /// Derive sticky values for the request and resolve their owner,
    /// handing back the cache the caller must flush once handling is done.
    pub fn resolve_route(
        &self,
        binding: &RouteBinding,
        params: &Params,
    ) -> Result<RouteDecision, RouteError> {
        let sticky_values = binding
            .sticky
            .as_ref()
            .map(|spec| derive(spec, params))
            .unwrap_or_default();

        let Resolution {
            owner,
            claimed_new,
            matched,
        } = self.router.resolve(&sticky_values, &binding.endpoint)?;

        let cache = StickyCache::new(
            self.store.clone(),
            &self.self_address,
            self.self_id,
            &binding.endpoint.key,
            &binding.endpoint.name,
        );
        let is_local = owner == self.self_address;
        if is_local {
            cache.note_owned(&matched);
            if claimed_new {
                // Already persisted by the claim insert.
                cache.note_owned(&sticky_values);
            } else {
                // Sticky hit: queue any derived values the mapping does not
                // cover yet; they land at flush.
                cache.add_sticky(&sticky_values);
            }
        }
        Ok(RouteDecision {
            owner,
            is_local,
            sticky_values,
            cache,
        })
    }

    /// Release stickiness for the given values (session end).
    pub fn release(&self, values: &[String]) -> Result<usize, StoreError> {
        self.store.delete_sticky_values(values)
    }

    /// Release every sticky value this node holds.
    pub fn release_all(&self) -> Result<usize, StoreError> {
        self.store.delete_all_for_server(&self.self_address)
    }

    /// Persist the node's load immediately (bypassing any cache).
    pub fn report_load(&self, load: f64) -> Result<(), StoreError> {
        self.store
            .save_load_and_state(&self.self_address, Some(load), None)
    }

    /// The recovery blob persisted for this node.
    pub fn server_state(&self) -> Result<String, StoreError> {
        self.store.server_state(&self.self_address)
    }

    /// Overwrite the recovery blob for this node.
    pub fn set_server_state(&self, blob: &str) -> Result<(), StoreError> {
        self.store.set_server_state(&self.self_address, blob)
    }

    pub fn status(&self) -> Result<NodeStatus, StoreError> {
        Ok(NodeStatus {
            address: self.self_address.clone(),
            server_type: self.server_type.clone(),
            server_id: self.self_id,
            load: self.store.current_load(&self.self_address)?,
        })
    }

    /// Administrative removal of this node's row (mappings cascade away).
    pub fn leave(&self) -> Result<(), StoreError> {
        self.store.remove_server(&self.self_address)
    }
}

/// Build the endpoint identities for configured routes, minting one opaque
/// key per route per process start.
pub fn bind_routes(
    names_and_specs: Vec<(String, Option<StickySpec>)>,
) -> HashMap<String, RouteBinding> {
    names_and_specs
        .into_iter()
        .map(|(name, sticky)| {
            let binding = RouteBinding {
                endpoint: EndpointIdentity {
                    key: uuid::Uuid::new_v4().to_string(),
                    name: name.clone(),
                },
                sticky,
            };
            (name, binding)
        })
        .collect()
}
