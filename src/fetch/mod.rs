//! Rate-limited fetch client
//!
//! Every call to an external metadata API goes through [`FetchClient`]:
//! a per-attempt timeout, exponential backoff on transient failures, and an
//! optional per-API [`Throttle`] that spaces calls apart.

mod client;
mod throttle;

pub use client::*;
pub use throttle::*;
