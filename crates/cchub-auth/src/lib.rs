//! Cached `OAuth2` client-credentials tokens for calls to the Customer's Canvas backend.
//!
//! A [`TokenProvider`] hands out bearer tokens, requesting a new one only when the
//! cached token is about to expire. [`HttpClient`] attaches them to outgoing requests.
#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::pedantic
)]
#![forbid(unsafe_code)]

mod authorizers;
pub mod backend;
mod client;
pub mod clock;
mod config;
pub mod error;
pub use authorizers::*;
pub use backend::{AuthBackend, Grant, OAuth2Backend};
pub use client::*;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::*;
pub use error::{AuthenticationError, Error, Result};
