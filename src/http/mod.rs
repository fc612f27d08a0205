//! HTTP subsystem: the node server and request-parameter extraction.

pub mod params;
pub mod server;

pub use server::{AppState, HttpServer};
