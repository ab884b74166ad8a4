//! Requests made on behalf of pages.

mod client;
mod error;

pub use client::ApiClient;
