//! Messages the host application sends to steer the layer.
//!
//! On the wire they are JSON objects tagged by `type`:
//! `{"type": "SKIP_WAITING"}`, `{"type": "GET_VERSION"}`,
//! `{"type": "FORCE_SYNC"}`.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};

use crate::lifecycle::{ActivationReport, LifecycleState};
use crate::pending::PendingStats;
use crate::sync::SyncReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  /// Activate a waiting install without waiting for old sessions
  SkipWaiting,
  /// Report the active version tag
  GetVersion,
  /// Drain the pending log now, ignoring backoff
  ForceSync,
  /// Report lifecycle state and queue depth
  GetStatus,
}

impl ControlMessage {
  pub fn parse(json: &str) -> Result<Self> {
    serde_json::from_str(json).map_err(|e| eyre!("Invalid control message: {}", e))
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlReply {
  /// `None` when nothing was waiting to activate
  SkipWaiting { activation: Option<ActivationReport> },
  Version {
    active: Option<String>,
    current: String,
  },
  Sync(SyncReport),
  Status {
    state: LifecycleState,
    active: Option<String>,
    queue: PendingStats,
  },
}
