//! # authrelay-core
//!
//! Shared vocabulary for the authentication event relay:
//!
//! - **Branded IDs**: [`SessionId`], [`RequestId`], [`ListenerId`] as newtypes
//! - **Events**: the immutable [`Event`] envelope pushed to subscribers
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` subscriber

#![deny(unsafe_code)]

pub mod events;
pub mod ids;
pub mod logging;

pub use events::{Event, EventKind, Payload};
pub use ids::{ListenerId, RequestId, SessionId};
