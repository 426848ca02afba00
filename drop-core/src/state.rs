//! Change-detection state machine for kvdrop monitors.
//!
//! This module decides, for one tick of a monitor, whether to push, pull or
//! do nothing. It compares fingerprints of the current local and remote
//! values against the ones recorded at the last successful sync. It is pure:
//! the caller (kvdrop-client) performs the transfer and then asks for the
//! next state.
//!
//! Fingerprints, not timestamps, gate every decision, so re-running a tick
//! with nothing changed never produces a write.

use kvdrop_types::Fingerprint;
use serde::{Deserialize, Serialize};

/// Direction a monitor synchronizes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Local changes are written to the remote record.
    Push,
    /// Remote changes are applied to the local resource.
    Pull,
}

/// Where a monitor is within its tick cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPhase {
    /// Waiting for the next tick.
    Idle,
    /// Reading the local value and remote metadata.
    Checking,
    /// Nothing to transfer this tick.
    NoChange,
    /// Writing the local value to the remote record.
    Pushing,
    /// Fetching the remote value and applying it locally.
    Pulling,
}

/// What one tick should do, decided from fingerprints alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Neither side changed.
    Idle,
    /// The remote side moved but there is nothing to transfer in this mode;
    /// record the new remote fingerprint.
    Adopt {
        /// Remote fingerprint to record (`None` if the record is gone).
        remote: Option<Fingerprint>,
    },
    /// Write local to remote.
    Push {
        /// Both sides changed since the last sync; local overwrites remote.
        conflict: bool,
    },
    /// Fetch remote and write it locally.
    Pull {
        /// Both sides changed since the last sync; remote overwrites local.
        conflict: bool,
    },
}

impl Plan {
    /// Phase the monitor is in while executing this plan.
    pub fn phase(&self) -> TickPhase {
        match self {
            Plan::Idle | Plan::Adopt { .. } => TickPhase::NoChange,
            Plan::Push { .. } => TickPhase::Pushing,
            Plan::Pull { .. } => TickPhase::Pulling,
        }
    }

    /// Whether this plan moves a payload.
    pub fn is_transfer(&self) -> bool {
        matches!(self, Plan::Push { .. } | Plan::Pull { .. })
    }

    /// Whether this plan resolves a conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Plan::Push { conflict: true } | Plan::Pull { conflict: true }
        )
    }
}

/// Per-monitor memory of the last successful sync.
///
/// Lives only as long as the process: a restart begins with a fresh state,
/// which forces one full resync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    last_local: Option<Fingerprint>,
    last_remote: Option<Fingerprint>,
    last_sync_ms: Option<u64>,
}

impl SyncState {
    /// A state that has never synced.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fingerprint of the local value at the last sync.
    pub fn last_local_fingerprint(&self) -> Option<Fingerprint> {
        self.last_local
    }

    /// Fingerprint of the remote record at the last sync.
    pub fn last_remote_fingerprint(&self) -> Option<Fingerprint> {
        self.last_remote
    }

    /// Time of the last completed tick (unix milliseconds).
    pub fn last_sync_ms(&self) -> Option<u64> {
        self.last_sync_ms
    }

    /// Whether no tick has completed yet.
    pub fn is_fresh(&self) -> bool {
        self.last_sync_ms.is_none()
    }

    /// Decide what this tick should do.
    ///
    /// `local` is the fingerprint of the current local value (`None` when
    /// the resource has no value). `remote` is the fingerprint reported by
    /// the store (`None` when the record is missing or expired).
    pub fn plan(
        &self,
        mode: SyncMode,
        local: Option<Fingerprint>,
        remote: Option<Fingerprint>,
    ) -> Plan {
        let local_changed = local != self.last_local;
        let remote_changed = remote != self.last_remote;

        match mode {
            SyncMode::Push => {
                if local.is_none() {
                    return if remote_changed {
                        Plan::Adopt { remote }
                    } else {
                        Plan::Idle
                    };
                }
                if self.is_fresh() {
                    return Plan::Push { conflict: false };
                }
                if local_changed {
                    return Plan::Push {
                        conflict: remote_changed && remote.is_some(),
                    };
                }
                if remote.is_none() {
                    // Record expired or was deleted: restore it.
                    return Plan::Push { conflict: false };
                }
                if remote_changed {
                    Plan::Adopt { remote }
                } else {
                    Plan::Idle
                }
            }
            SyncMode::Pull => {
                if remote.is_none() {
                    return if remote_changed {
                        Plan::Adopt { remote: None }
                    } else {
                        Plan::Idle
                    };
                }
                if self.is_fresh() {
                    return Plan::Pull { conflict: false };
                }
                if remote_changed {
                    Plan::Pull {
                        conflict: local_changed && local.is_some(),
                    }
                } else {
                    Plan::Idle
                }
            }
        }
    }

    /// State after a successful push or pull.
    pub fn after_transfer(&self, local: Fingerprint, remote: Fingerprint, now_ms: u64) -> Self {
        Self {
            last_local: Some(local),
            last_remote: Some(remote),
            last_sync_ms: Some(now_ms),
        }
    }

    /// State after a tick that recorded a new remote fingerprint without transfer.
    pub fn after_adopt(&self, remote: Option<Fingerprint>, now_ms: u64) -> Self {
        Self {
            last_local: self.last_local,
            last_remote: remote,
            last_sync_ms: Some(now_ms),
        }
    }

    /// State after a tick with nothing to do.
    ///
    /// Only the sync time moves, so liveness stays observable.
    pub fn after_idle(&self, now_ms: u64) -> Self {
        Self {
            last_sync_ms: Some(now_ms),
            ..self.clone()
        }
    }
}

/// Result of one completed tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing changed.
    Unchanged,
    /// A new remote fingerprint was recorded without transfer.
    Adopted,
    /// The local value was written to the remote record.
    Pushed,
    /// The remote value was applied locally.
    Pulled,
}

/// Events reported by a running monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Local value pushed.
    Pushed {
        /// Fingerprint of the pushed local value.
        fingerprint: Fingerprint,
    },
    /// Remote value pulled and applied.
    Pulled {
        /// Fingerprint of the applied value.
        fingerprint: Fingerprint,
    },
    /// Tick completed without transfer.
    Unchanged,
    /// Both sides changed since the last sync; the mode's side won.
    Conflict {
        /// Direction of the monitor, and so the winning side.
        mode: SyncMode,
    },
    /// A tick failed with a transient error; the monitor keeps running.
    TickFailed {
        /// Error message describing the failure.
        error: String,
    },
}
