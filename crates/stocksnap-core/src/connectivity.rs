//! Network reachability monitoring.
//!
//! The host app feeds platform reachability callbacks into `publish`; the
//! monitor deduplicates them so consumers only ever see genuine transitions,
//! never the redundant re-notifications platform APIs are prone to.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Kind of transport currently carrying traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// No usable transport.
    #[default]
    None,
    Wifi,
    Cellular,
    Wired,
}

/// Point-in-time reachability state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NetworkSnapshot {
    pub reachable: bool,
    pub transport: TransportKind,
}

impl NetworkSnapshot {
    /// Snapshot for an offline device.
    #[must_use]
    pub const fn offline() -> Self {
        Self {
            reachable: false,
            transport: TransportKind::None,
        }
    }

    /// Snapshot for a device on Wi-Fi.
    #[must_use]
    pub const fn wifi() -> Self {
        Self {
            reachable: true,
            transport: TransportKind::Wifi,
        }
    }

    /// Snapshot for a device on cellular.
    #[must_use]
    pub const fn cellular() -> Self {
        Self {
            reachable: true,
            transport: TransportKind::Cellular,
        }
    }

    /// Whether this snapshot satisfies a Wi-Fi-only upload policy.
    /// Wired counts: it is unmetered like Wi-Fi.
    #[must_use]
    pub const fn is_unmetered(self) -> bool {
        self.reachable && matches!(self.transport, TransportKind::Wifi | TransportKind::Wired)
    }
}

/// One observed transition between snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityChange {
    pub previous: NetworkSnapshot,
    pub current: NetworkSnapshot,
}

impl ConnectivityChange {
    /// Did this transition bring Wi-Fi (or wired) up from somewhere it wasn't?
    #[must_use]
    pub const fn regained_unmetered(self) -> bool {
        !self.previous.is_unmetered() && self.current.is_unmetered()
    }

    /// Did this transition make the network usable at all? Whether the
    /// transport satisfies the Wi-Fi-only preference is the orchestrator's
    /// call, not the monitor's.
    #[must_use]
    pub const fn regained_connectivity(self) -> bool {
        !self.previous.reachable && self.current.reachable
    }

    /// Did this transition take the device offline?
    #[must_use]
    pub const fn lost_connectivity(self) -> bool {
        self.previous.reachable && !self.current.reachable
    }
}

/// Observes reachability and emits change events.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    sender: watch::Sender<NetworkSnapshot>,
}

impl ConnectivityMonitor {
    /// New monitor starting from the given snapshot.
    #[must_use]
    pub fn new(initial: NetworkSnapshot) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    /// Current state, readable synchronously at any time.
    #[must_use]
    pub fn current(&self) -> NetworkSnapshot {
        *self.sender.borrow()
    }

    /// Feed a platform reachability callback. Returns the transition if the
    /// state actually changed; redundant callbacks produce nothing.
    pub fn publish(&self, snapshot: NetworkSnapshot) -> Option<ConnectivityChange> {
        let previous = self.current();
        let changed = self.sender.send_if_modified(|state| {
            if *state == snapshot {
                false
            } else {
                *state = snapshot;
                true
            }
        });

        if changed {
            tracing::debug!(?previous, current = ?snapshot, "Connectivity changed");
            Some(ConnectivityChange {
                previous,
                current: snapshot,
            })
        } else {
            None
        }
    }

    /// Subscribe to state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<NetworkSnapshot> {
        self.sender.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(NetworkSnapshot::offline())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn publish_emits_only_on_change() {
        let monitor = ConnectivityMonitor::new(NetworkSnapshot::offline());

        let change = monitor.publish(NetworkSnapshot::wifi()).unwrap();
        assert!(change.regained_unmetered());
        assert_eq!(monitor.current(), NetworkSnapshot::wifi());

        // Redundant platform callback: no event.
        assert!(monitor.publish(NetworkSnapshot::wifi()).is_none());
    }

    #[test]
    fn transport_change_without_reachability_change_still_emits() {
        let monitor = ConnectivityMonitor::new(NetworkSnapshot::cellular());

        let change = monitor.publish(NetworkSnapshot::wifi()).unwrap();
        assert!(change.regained_unmetered());
        assert!(!change.lost_connectivity());
    }

    #[test]
    fn losing_the_network_is_classified() {
        let monitor = ConnectivityMonitor::new(NetworkSnapshot::wifi());

        let change = monitor.publish(NetworkSnapshot::offline()).unwrap();
        assert!(change.lost_connectivity());
        assert!(!change.regained_unmetered());
    }

    #[tokio::test]
    async fn subscribers_observe_transitions() {
        let monitor = ConnectivityMonitor::new(NetworkSnapshot::offline());
        let mut rx = monitor.subscribe();

        monitor.publish(NetworkSnapshot::wifi());
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), NetworkSnapshot::wifi());
    }

    #[test]
    fn wired_satisfies_wifi_only_policy() {
        let snapshot = NetworkSnapshot {
            reachable: true,
            transport: TransportKind::Wired,
        };
        assert!(snapshot.is_unmetered());
        assert!(!NetworkSnapshot::cellular().is_unmetered());
    }
}
