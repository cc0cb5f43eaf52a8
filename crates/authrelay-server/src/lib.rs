//! # authrelay-server
//!
//! Session-keyed event fan-out and the HTTP surface around it.
//!
//! - [`registry::SessionRegistry`]: `SessionId` to listener handles, with broadcast delivery
//! - [`relay::EventRelay`]: bootstrap on subscribe, command then delayed poll then broadcast
//! - [`lifecycle`]: guards that unregister listeners when their transport closes
//! - [`timer::DelayScheduler`]: tracked, cancellable delayed jobs
//! - [`server::RelayServer`]: Axum router with SSE streams, health, and metrics

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod metrics;
pub mod registry;
pub mod relay;
pub mod server;
pub mod shutdown;
pub mod timer;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{RelayConfig, ServerConfig};
pub use registry::{DeliveryReport, ListenerHandle, SessionRegistry};
pub use relay::{Accepted, EventRelay, RelayError};
pub use server::RelayServer;
