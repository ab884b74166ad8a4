//! The offline worker: sits between the client and the network and decides,
//! per request, whether bytes come from the network or from the cache.
//!
//! It shares no state with the page side. Pages talk to it through fetches
//! and JSON messages only.

mod controller;
mod fetcher;
mod message;
mod strategy;

pub use controller::{WorkerController, WorkerState};
pub use fetcher::{FetchError, Fetcher, HttpFetcher};
pub use message::{ClientMessage, WorkerMessage};

#[cfg(test)]
pub use fetcher::testing;
