//! Sync orchestration.
//!
//! One state machine decides, on each trigger, whether a sync pass may run,
//! then drains the pending queue sequentially. Sequential draining is a
//! deliberate trade-off: simple backpressure against a modest backend and no
//! interleaved partial-failure bookkeeping. There is no parallel fan-out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::auth::{AuthDecision, AuthorizationGate};
use crate::connectivity::ConnectivityMonitor;
use crate::db::{PreferenceStore, RecordStore};
use crate::models::{RecordId, SyncStatus, UploadRecord};
use crate::resolver::{PathResolver, ResolveError};
use crate::uploader::ArtifactUploader;
use crate::util::unix_timestamp_ms;

/// Per-pass record cap for background wakes. The host platform grants only a
/// few seconds of background time; this is a budget heuristic, not an
/// architectural constant, and may be tuned per platform.
pub const BACKGROUND_BATCH_LIMIT: usize = 3;

/// Pause after a failed upload before considering the next record, so a pass
/// does not hot-loop against a failing server.
const FAILURE_BACKOFF: Duration = Duration::from_secs(2);

/// How long a record may stay unresolvable before it becomes a prune
/// candidate. Protects records whose file write races the insert.
const UNRESOLVABLE_GRACE: Duration = Duration::from_secs(60);

/// What woke the orchestrator up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Process start; covers triggers lost to a force-termination.
    AppLaunch,
    /// App returned to the foreground.
    AppForeground,
    /// Connectivity transition regained a usable network.
    ConnectivityRegained,
    /// Recurring foreground timer.
    Timer,
    /// Explicit user action.
    Manual,
    /// OS background wake with a strict time budget.
    BackgroundWake,
}

impl SyncTrigger {
    /// Record cap for this trigger, if any.
    #[must_use]
    pub const fn batch_limit(self) -> Option<usize> {
        match self {
            Self::BackgroundWake => Some(BACKGROUND_BATCH_LIMIT),
            _ => None,
        }
    }
}

/// Typed result of one trigger call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// A pass was already in flight; this trigger was dropped, not queued.
    AlreadyRunning,
    /// Nothing pending; no network touched.
    NothingPending,
    /// Entry guards refused the pass.
    Blocked { reason: String },
    /// The drain loop ran (possibly halting early on connectivity loss).
    Completed {
        uploaded: usize,
        attempted: usize,
        skipped: usize,
        pruned: usize,
    },
}

/// The engine's central state machine.
///
/// Holds every collaborator behind a trait seam so hosts and tests can
/// substitute fakes. Exactly one pass runs at a time; re-entrant triggers
/// are no-ops.
pub struct SyncOrchestrator {
    store: Arc<dyn RecordStore>,
    resolver: PathResolver,
    monitor: ConnectivityMonitor,
    gate: Arc<dyn AuthorizationGate>,
    uploader: Arc<dyn ArtifactUploader>,
    prefs: Arc<dyn PreferenceStore>,
    status_tx: watch::Sender<SyncStatus>,
    pass_active: AtomicBool,
    failure_backoff: Duration,
    unresolvable_grace: Duration,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        resolver: PathResolver,
        monitor: ConnectivityMonitor,
        gate: Arc<dyn AuthorizationGate>,
        uploader: Arc<dyn ArtifactUploader>,
        prefs: Arc<dyn PreferenceStore>,
    ) -> Self {
        let (status_tx, _) = watch::channel(SyncStatus::idle("idle"));
        Self {
            store,
            resolver,
            monitor,
            gate,
            uploader,
            prefs,
            status_tx,
            pass_active: AtomicBool::new(false),
            failure_backoff: FAILURE_BACKOFF,
            unresolvable_grace: UNRESOLVABLE_GRACE,
        }
    }

    /// Override the post-failure pause (tests use zero).
    #[must_use]
    pub const fn with_failure_backoff(mut self, backoff: Duration) -> Self {
        self.failure_backoff = backoff;
        self
    }

    /// Override the unresolvable-record grace window.
    #[must_use]
    pub const fn with_unresolvable_grace(mut self, grace: Duration) -> Self {
        self.unresolvable_grace = grace;
        self
    }

    /// Current pass status.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.status_tx.borrow().clone()
    }

    /// Subscribe to pass status updates.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Request a sync pass. Coalesced: while a pass is checking or uploading,
    /// further triggers return `AlreadyRunning` and do nothing.
    pub async fn trigger(&self, trigger: SyncTrigger) -> PassOutcome {
        if self
            .pass_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(?trigger, "Sync already running, trigger dropped");
            return PassOutcome::AlreadyRunning;
        }
        // Reset on drop: a background pass can be cancelled mid-await when
        // the OS revokes its time budget.
        let _guard = PassGuard(&self.pass_active);

        tracing::debug!(?trigger, "Sync pass starting");
        let outcome = self.run_pass(trigger).await;
        tracing::debug!(?trigger, ?outcome, "Sync pass finished");
        outcome
    }

    /// Checking -> (Blocked | Uploading) -> Idle.
    async fn run_pass(&self, trigger: SyncTrigger) -> PassOutcome {
        // Cheap early exit: never open a network connection for n = 0.
        let pending_count = match self.store.count_pending() {
            Ok(count) => count,
            Err(error) => {
                tracing::warn!("Failed to count pending records: {error}");
                return self.block("store unavailable".to_string());
            }
        };
        if pending_count == 0 {
            self.publish_idle("nothing to upload");
            return PassOutcome::NothingPending;
        }

        if let Some(reason) = self.connectivity_block() {
            return self.block(reason);
        }

        // Uploads never start while authorization is unresolved or denied.
        match self.gate.check_authorization().await {
            AuthDecision::Authorized {
                owner_label,
                degraded,
            } => {
                if degraded {
                    tracing::warn!("Proceeding on degraded (cached) authorization");
                } else if let Some(owner) = owner_label {
                    self.adopt_owner_label(&owner);
                }
            }
            AuthDecision::Denied { reason } => {
                tracing::info!(%reason, "Sync blocked: device not authorized");
                return self.block("device not authorized".to_string());
            }
        }

        let mut records = match self.store.list_pending() {
            Ok(records) => records,
            Err(error) => {
                tracing::warn!("Failed to list pending records: {error}");
                return self.block("store unavailable".to_string());
            }
        };
        if let Some(limit) = trigger.batch_limit() {
            records.truncate(limit);
        }

        self.drain(&records).await
    }

    /// Uploading: drain the batch strictly sequentially.
    async fn drain(&self, records: &[UploadRecord]) -> PassOutcome {
        let total = records.len();
        let mut uploaded = 0;
        let mut attempted = 0;
        let mut skipped = 0;
        let mut prune_candidates: Vec<RecordId> = Vec::new();
        let mut halted = false;

        for (index, record) in records.iter().enumerate() {
            // Connectivity is re-checked at every iteration boundary so a
            // loss mid-batch halts the batch instead of failing every
            // remaining record against a dead socket.
            if let Some(reason) = self.connectivity_block() {
                tracing::info!(%reason, "Connectivity lost mid-batch, halting pass");
                halted = true;
                break;
            }

            self.status_tx.send_replace(SyncStatus::running(
                index + 1,
                total,
                uploaded,
                format!("uploading {} of {}", index + 1, total),
            ));

            let path = match self.resolver.resolve(record) {
                Ok(path) => path,
                Err(ResolveError::NotFound { .. }) => {
                    // Skipped, not an attempted failure; reconsidered next pass.
                    skipped += 1;
                    if self.past_grace(record) {
                        prune_candidates.push(record.id);
                    } else {
                        tracing::debug!(
                            record_id = record.id.as_i64(),
                            "Artifact unresolvable but within grace window"
                        );
                    }
                    continue;
                }
            };

            attempted += 1;
            match self.uploader.upload(record, &path).await {
                Ok(()) => {
                    match self.store.mark_uploaded(record.id) {
                        Ok(true) => uploaded += 1,
                        Ok(false) => {
                            // Already uploaded by an earlier confirmed pass;
                            // at-least-once delivery tolerates the duplicate.
                            tracing::debug!(
                                record_id = record.id.as_i64(),
                                "Record was already marked uploaded"
                            );
                        }
                        Err(error) => {
                            tracing::warn!(
                                record_id = record.id.as_i64(),
                                "Upload confirmed but status update failed: {error}"
                            );
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(record_id = record.id.as_i64(), "Upload failed: {error}");
                    if index + 1 < total && !self.failure_backoff.is_zero() {
                        tokio::time::sleep(self.failure_backoff).await;
                    }
                }
            }
        }

        // Cleanup runs only inside a pass, never opportunistically.
        let pruned = match self.store.prune(&prune_candidates) {
            Ok(pruned) => {
                if pruned > 0 {
                    tracing::info!(pruned, "Pruned records with no resolvable artifact");
                }
                pruned
            }
            Err(error) => {
                tracing::warn!("Failed to prune unresolvable records: {error}");
                0
            }
        };

        let message = if halted {
            format!("interrupted, uploaded {uploaded} of {total}")
        } else {
            format!("uploaded {uploaded} of {total}")
        };
        self.status_tx.send_replace(SyncStatus {
            is_running: false,
            current_index: 0,
            total_count: total,
            uploaded_count: uploaded,
            message,
        });

        PassOutcome::Completed {
            uploaded,
            attempted,
            skipped,
            pruned,
        }
    }

    /// Evaluate current connectivity against the Wi-Fi-only preference.
    fn connectivity_block(&self) -> Option<String> {
        let snapshot = self.monitor.current();
        if !snapshot.reachable {
            return Some("waiting for network".to_string());
        }

        let wifi_only = self
            .prefs
            .preferences()
            .map(|prefs| prefs.wifi_only)
            .unwrap_or(true);
        if wifi_only && !snapshot.is_unmetered() {
            return Some("waiting for Wi-Fi".to_string());
        }

        None
    }

    /// When the server reports a changed owner label, rewrite historical
    /// records and adopt the new label for future uploads.
    fn adopt_owner_label(&self, owner: &str) {
        let Ok(mut prefs) = self.prefs.preferences() else {
            return;
        };
        if prefs.uploader_name == owner {
            return;
        }

        if !prefs.uploader_name.is_empty() {
            match self.store.reassign_owner(&prefs.uploader_name, owner) {
                Ok(changed) if changed > 0 => {
                    tracing::info!(
                        changed,
                        old = %prefs.uploader_name,
                        new = %owner,
                        "Reassigned record owner"
                    );
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!("Failed to reassign record owner: {error}");
                }
            }
        }

        prefs.uploader_name = owner.to_string();
        if let Err(error) = self.prefs.set_preferences(&prefs) {
            tracing::warn!("Failed to persist uploader name: {error}");
        }
    }

    fn past_grace(&self, record: &UploadRecord) -> bool {
        let age_ms = unix_timestamp_ms().saturating_sub(record.created_at);
        age_ms >= i64::try_from(self.unresolvable_grace.as_millis()).unwrap_or(i64::MAX)
    }

    fn block(&self, reason: String) -> PassOutcome {
        self.publish_idle(&reason);
        PassOutcome::Blocked { reason }
    }

    fn publish_idle(&self, message: &str) {
        self.status_tx.send_replace(SyncStatus::idle(message));
    }
}

/// Clears the single-pass flag even if the pass future is dropped.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
