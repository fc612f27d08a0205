//! Cluster sticky-routing subsystem.
//!
//! # Data Flow
//! ```text
//! request params + route sticky spec
//!     → sticky.rs (derive concrete sticky values)
//!     → router.rs (sticky hit → owner; miss → least-loaded + claim)
//!     → owner != self → proxy subsystem forwards
//!     → owner == self → handler runs; cache.rs buffers new claims and
//!       load/state, flushed once at request end
//! ```
//!
//! # Design Decisions
//! - Ownership races are settled by the store's uniqueness constraints,
//!   never by application-level locking
//! - The write-back cache is request-scoped; nothing sticky-related is
//!   shared between requests except through the store

pub mod cache;
pub mod coordinator;
pub mod router;
pub mod sticky;

pub use cache::StickyCache;
pub use coordinator::{bind_routes, Coordinator, NodeStatus, RouteBinding, RouteDecision, StartMode};
pub use router::{ClusterRouter, EndpointIdentity, Resolution, RouteError};
pub use sticky::{derive, Params, StickySpec, STICKY_VALUE_SEP};
