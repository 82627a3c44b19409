//! Background execution bridge.
//!
//! Adapts the orchestrator to the host OS's constrained background execution
//! model: time-boxed wakes after the app backgrounds, local notifications
//! nudging the user to reopen the app when Wi-Fi comes back, and a launch
//! check that covers triggers lost to a force-termination.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::connectivity::ConnectivityChange;
use crate::db::RecordStore;
use crate::sync::{PassOutcome, SyncOrchestrator, SyncTrigger};
use crate::util::unix_timestamp_ms;

/// Minimum spacing between pending-upload notifications for an unchanged
/// pending count, so a flapping network doesn't spam the user.
const NOTIFY_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// A live best-effort execution grant from the OS.
///
/// `expired()` resolves if the OS revokes the remaining time; a bridge racing
/// a pass against it must assume the pass can be cut off at any await point.
pub struct BackgroundGrant {
    id: u64,
    expiration: Arc<tokio::sync::Notify>,
}

impl BackgroundGrant {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self {
            id,
            expiration: Arc::new(tokio::sync::Notify::new()),
        }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Handle the host adapter fires when the OS expires the grant.
    #[must_use]
    pub fn expiration_handle(&self) -> Arc<tokio::sync::Notify> {
        self.expiration.clone()
    }

    /// Resolves when the OS revokes the grant.
    pub async fn expired(&self) {
        self.expiration.notified().await;
    }
}

/// Host OS seam for best-effort continued execution.
pub trait BackgroundScheduler: Send + Sync {
    /// Request continued execution; best-effort, may expire at any time.
    fn begin_task(&self) -> BackgroundGrant;

    /// Report that the work tied to a grant is done.
    fn end_task(&self, id: u64);
}

/// Scheduler for hosts without a background-execution API; grants never expire.
#[derive(Default)]
pub struct NoopScheduler {
    next_id: AtomicU64,
}

impl BackgroundScheduler for NoopScheduler {
    fn begin_task(&self) -> BackgroundGrant {
        BackgroundGrant::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn end_task(&self, _id: u64) {}
}

/// Host seam for local user notifications.
pub trait UserNotifier: Send + Sync {
    /// Tell the user how many captures are waiting so they can reopen the app.
    fn notify_pending(&self, pending: usize);
}

/// Notifier for hosts without a notification surface.
pub struct NoopNotifier;

impl UserNotifier for NoopNotifier {
    fn notify_pending(&self, _pending: usize) {}
}

/// Result of a background-boxed sync attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackgroundRun {
    /// The pass ran to its own conclusion within the granted time.
    Finished(PassOutcome),
    /// The OS revoked time before the pass completed. Not retried
    /// immediately; the next trigger picks the queue back up.
    Expired,
}

/// Bridges app-lifecycle and OS background events onto the orchestrator.
pub struct BackgroundBridge {
    orchestrator: Arc<SyncOrchestrator>,
    scheduler: Arc<dyn BackgroundScheduler>,
    notifier: Arc<dyn UserNotifier>,
    store: Arc<dyn RecordStore>,
    foregrounded: AtomicBool,
    last_notified: Mutex<Option<(usize, i64)>>,
    notify_cooldown: Duration,
}

impl BackgroundBridge {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        scheduler: Arc<dyn BackgroundScheduler>,
        notifier: Arc<dyn UserNotifier>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            orchestrator,
            scheduler,
            notifier,
            store,
            foregrounded: AtomicBool::new(true),
            last_notified: Mutex::new(None),
            notify_cooldown: NOTIFY_COOLDOWN,
        }
    }

    /// Override the notification cooldown (tests use zero or small values).
    #[must_use]
    pub const fn with_notify_cooldown(mut self, cooldown: Duration) -> Self {
        self.notify_cooldown = cooldown;
        self
    }

    /// Process launch: one immediate check independent of other triggers,
    /// covering a force-terminated process whose in-memory triggers are gone.
    pub async fn on_app_launch(&self) -> PassOutcome {
        self.foregrounded.store(true, Ordering::Release);
        self.orchestrator.trigger(SyncTrigger::AppLaunch).await
    }

    /// App returned to the foreground.
    pub async fn on_app_foreground(&self) -> PassOutcome {
        self.foregrounded.store(true, Ordering::Release);
        self.orchestrator.trigger(SyncTrigger::AppForeground).await
    }

    /// App moved to the background: request best-effort time and attempt a
    /// capped pass, abandoning it if the OS revokes the grant first.
    pub async fn on_app_background(&self) -> BackgroundRun {
        self.foregrounded.store(false, Ordering::Release);

        let grant = self.scheduler.begin_task();
        let grant_id = grant.id();

        let run = tokio::select! {
            outcome = self.orchestrator.trigger(SyncTrigger::BackgroundWake) => {
                BackgroundRun::Finished(outcome)
            }
            () = grant.expired() => {
                tracing::warn!("OS revoked background time before the pass completed");
                BackgroundRun::Expired
            }
        };

        self.scheduler.end_task(grant_id);
        run
    }

    /// Connectivity transition, foreground or background.
    pub async fn on_connectivity_change(&self, change: ConnectivityChange) -> Option<PassOutcome> {
        if self.foregrounded.load(Ordering::Acquire) {
            // Any newly usable network is worth a pass, including a cellular
            // regain or a cellular-to-Wi-Fi upgrade; the orchestrator holds
            // the pass back if the transport violates the Wi-Fi-only
            // preference.
            if change.regained_connectivity() || change.regained_unmetered() {
                return Some(
                    self.orchestrator
                        .trigger(SyncTrigger::ConnectivityRegained)
                        .await,
                );
            }
            return None;
        }

        // Backgrounded: we cannot reliably run a full pass, so prompt the
        // user to reopen the app instead. Only an unmetered network is
        // worth the interruption.
        if !change.regained_unmetered() {
            return None;
        }
        match self.store.count_pending() {
            Ok(0) | Err(_) => {}
            Ok(pending) => self.maybe_notify(pending),
        }
        None
    }

    /// Recurring foreground timer: ticks are dropped while backgrounded.
    pub async fn on_timer_tick(&self) -> Option<PassOutcome> {
        if self.foregrounded.load(Ordering::Acquire) {
            Some(self.orchestrator.trigger(SyncTrigger::Timer).await)
        } else {
            None
        }
    }

    /// Post a pending-count notification unless an identical one went out
    /// within the cooldown window.
    fn maybe_notify(&self, pending: usize) {
        let now = unix_timestamp_ms();
        let cooldown_ms = i64::try_from(self.notify_cooldown.as_millis()).unwrap_or(i64::MAX);

        let Ok(mut last) = self.last_notified.lock() else {
            return;
        };
        if let Some((last_pending, last_at)) = *last {
            if last_pending == pending && now.saturating_sub(last_at) < cooldown_ms {
                tracing::debug!(pending, "Suppressed pending notification within cooldown");
                return;
            }
        }

        *last = Some((pending, now));
        drop(last);

        tracing::info!(pending, "Notifying user of pending uploads");
        self.notifier.notify_pending(pending);
    }
}
