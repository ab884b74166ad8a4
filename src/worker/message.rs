//! Page/worker message protocol.
//!
//! Messages are JSON objects tagged by `type`, e.g.
//! `{"type":"APP_VERSION","version":"1.2.0"}`.

use serde::{Deserialize, Serialize};

/// Sent by a page to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  /// Name dynamic and API buckets after this version from now on
  AppVersion { version: String },
  /// Drop every cache and start over
  CleanCaches { version: String },
}

/// Broadcast by the worker to every open client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
  CachesCleaned {
    /// Milliseconds since the Unix epoch
    timestamp: i64,
    version: String,
  },
}
