//! Sticky-session cluster coordination for HTTP nodes.
//!
//! Routes requests that share a sticky key (channel, client, session) to
//! the single node that owns it, claiming ownership durably in a shared
//! mapping store on first contact.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client Request
//!        │
//!        ▼
//!   ┌─────────┐   derive    ┌──────────┐   lookup/claim   ┌───────────┐
//!   │  http   │────────────▶│ cluster  │─────────────────▶│   store   │
//!   │ server  │  params     │ router   │  UNIQUE wins     │ (SQLite)  │
//!   └────┬────┘             └────┬─────┘                  └───────────┘
//!        │                       │
//!        │  owner == self        │  owner != self
//!        ▼                       ▼
//!   local handler           ┌─────────┐
//!   + write-back cache      │  proxy  │──▶ owning node
//!   flush at request end    └─────────┘
//! ```
//!
//! Cross-cutting concerns: `config` (TOML + validation), `resilience`
//! (bounded retry for transient store errors), `observability` (tracing +
//! metrics), `lifecycle` (graceful shutdown).

// Core subsystems
pub mod cluster;
pub mod config;
pub mod http;
pub mod proxy;
pub mod store;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use cluster::{Coordinator, StartMode};
pub use config::NodeConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
