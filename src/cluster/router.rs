//! Ownership resolution: sticky hit, least-loaded selection, claim.
//!
//! # Data Flow
//! ```text
//! sticky values
//!     → find_owner_by_sticky_values (sticky hit → owner, no mutation)
//!     → least_loaded(type, prefer self)  (miss → candidate)
//!     → candidate == self → claim every value (duplicates absorbed)
//!     → Resolution { owner, claimed_new }
//! ```
//!
//! # Design Decisions
//! - The lookup/claim sequence is not one serializable transaction; the
//!   unique constraints resolve races between nodes that pick themselves
//!   for overlapping values. The loser's insert is absorbed and the value
//!   belongs to the winner from the next lookup on
//! - Transient storage failures retry (bounded, fixed delay); conflicts
//!   and capacity exhaustion never do
//! - No server below 100% load is an explicit error, not a silent pass

use std::sync::Arc;

use thiserror::Error;

use crate::resilience::{retry_transient, RetryPolicy};
use crate::store::{Claim, MappingStore, StoreError};

/// Identity of the logical route/endpoint performing claims.
#[derive(Debug, Clone)]
pub struct EndpointIdentity {
    /// Opaque unique key (minted per route at node startup).
    pub key: String,
    /// Human-readable endpoint name; carries the per-endpoint uniqueness
    /// constraint in the store.
    pub name: String,
}

/// Routing failures surfaced to the HTTP collaborator.
#[derive(Debug, Error)]
pub enum RouteError {
    /// Every server of the pool type is at or above 100% load.
    #[error("no {server_type} server has spare capacity")]
    NoCapacity { server_type: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of ownership resolution for one request.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Address of the node that must handle the request.
    pub owner: String,
    /// True when this node selected itself and claimed the values.
    pub claimed_new: bool,
    /// Sticky values confirmed owned through existing mappings (sticky
    /// hit); empty on a fresh claim.
    pub matched: Vec<String>,
}

impl Resolution {
    fn local(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            claimed_new: false,
            matched: Vec::new(),
        }
    }
}

/// Decides the owning node for each set of sticky values.
pub struct ClusterRouter {
    store: Arc<dyn MappingStore>,
    server_type: String,
    self_address: String,
    self_id: i64,
    retry: RetryPolicy,
}

impl ClusterRouter {
    pub fn new(
        store: Arc<dyn MappingStore>,
        server_type: impl Into<String>,
        self_address: impl Into<String>,
        self_id: i64,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            server_type: server_type.into(),
            self_address: self_address.into(),
            self_id,
            retry,
        }
    }

    pub fn self_address(&self) -> &str {
        &self.self_address
    }

    pub fn server_type(&self) -> &str {
        &self.server_type
    }

    /// Resolve the owner for the given sticky values, claiming them for
    /// this node when it is the least-loaded candidate.
    pub fn resolve(
        &self,
        sticky_values: &[String],
        endpoint: &EndpointIdentity,
    ) -> Result<Resolution, RouteError> {
        if sticky_values.is_empty() {
            // No stickiness: clustering does not apply to this request.
            return Ok(Resolution::local(&self.self_address));
        }
        retry_transient(
            self.retry,
            |err: &RouteError| matches!(err, RouteError::Store(s) if s.is_transient()),
            || self.try_resolve(sticky_values, endpoint),
        )
    }

    fn try_resolve(
        &self,
        sticky_values: &[String],
        endpoint: &EndpointIdentity,
    ) -> Result<Resolution, RouteError> {
        if let Some(ownership) = self
            .store
            .find_owner_by_sticky_values(sticky_values, &self.server_type)?
        {
            let matched = ownership
                .mappings
                .into_iter()
                .map(|m| m.sticky_value)
                .collect();
            tracing::debug!(
                owner = %ownership.server.unique_key,
                "sticky hit"
            );
            return Ok(Resolution {
                owner: ownership.server.unique_key,
                claimed_new: false,
                matched,
            });
        }

        let candidate = self
            .store
            .least_loaded(&self.server_type, Some(&self.self_address))?
            .ok_or_else(|| RouteError::NoCapacity {
                server_type: self.server_type.clone(),
            })?;

        if candidate.unique_key != self.self_address {
            tracing::debug!(
                owner = %candidate.unique_key,
                load = candidate.load,
                "least-loaded peer selected"
            );
            return Ok(Resolution {
                owner: candidate.unique_key,
                claimed_new: false,
                matched: Vec::new(),
            });
        }

        // This node is the least-loaded candidate: claim every value now so
        // the ownership is visible before the handler runs. A duplicate-key
        // rejection means a concurrent request won the race for that value;
        // this request still runs here, and the next lookup finds the
        // winner.
        for value in sticky_values {
            match self.store.insert_sticky_value(
                self.self_id,
                &endpoint.key,
                &endpoint.name,
                value,
            )? {
                Claim::Inserted => {}
                Claim::AlreadyOwned => {
                    tracing::debug!(value = %value, "claim already taken");
                }
            }
        }
        Ok(Resolution {
            owner: self.self_address.clone(),
            claimed_new: true,
            matched: Vec::new(),
        })
    }
}
