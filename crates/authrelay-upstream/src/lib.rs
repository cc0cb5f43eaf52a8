//! # authrelay-upstream
//!
//! Outbound calls to the identity provider.
//!
//! - [`IdentityProvider`]: the four operations the relay depends on
//! - [`HttpIdentityProvider`]: `reqwest` implementation
//! - [`UpstreamError`]: every transport, status, and decoding failure
//!   normalized into one type
//! - [`DispatchHints`]: opaque pass-through routing metadata

#![deny(unsafe_code)]

pub mod client;
pub mod error;
pub mod hints;

pub use client::{BuildError, HttpIdentityProvider, IdentityProvider, UpstreamConfig};
pub use error::UpstreamError;
pub use hints::DispatchHints;
