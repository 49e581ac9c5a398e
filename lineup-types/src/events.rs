use tokio::sync::broadcast;

/// What kind of entity a change notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Priority marks for the listed bands changed.
    Priority,
    /// Attendance marks for the listed bands changed.
    Attendance,
    /// Upstream band facts changed.
    Band,
    /// Upstream schedule events changed.
    Event,
    /// Many records changed at once (import, profile deletion).
    Bulk,
}

/// A typed change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityChanged {
    pub kind: ChangeKind,
    /// Profile the change belongs to; `None` for upstream schedule changes.
    pub profile: Option<String>,
    /// Affected band names. Empty means "unspecified, assume everything".
    pub ids: Vec<String>,
}

impl EntityChanged {
    pub fn priority(profile: &str, band: &str) -> Self {
        Self {
            kind: ChangeKind::Priority,
            profile: Some(profile.to_string()),
            ids: vec![band.to_string()],
        }
    }

    pub fn attendance(profile: &str, band: &str) -> Self {
        Self {
            kind: ChangeKind::Attendance,
            profile: Some(profile.to_string()),
            ids: vec![band.to_string()],
        }
    }

    pub fn bulk(profile: &str) -> Self {
        Self {
            kind: ChangeKind::Bulk,
            profile: Some(profile.to_string()),
            ids: Vec::new(),
        }
    }

    pub fn upstream(kind: ChangeKind, ids: Vec<String>) -> Self {
        Self {
            kind,
            profile: None,
            ids,
        }
    }
}

const DEFAULT_BUS_CAPACITY: usize = 256;

/// Fan-out channel for [`EntityChanged`] notifications.
///
/// Cloning the bus yields another publisher on the same channel.
#[derive(Clone)]
pub struct ChangeBus {
    tx: broadcast::Sender<EntityChanged>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes a change. Returns the number of subscribers that will see it.
    pub fn publish(&self, change: EntityChanged) -> usize {
        self.tx.send(change).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EntityChanged> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeBus")
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_harmless() {
        let bus = ChangeBus::new();
        assert_eq!(bus.publish(EntityChanged::bulk("Default")), 0);
    }

    #[test]
    fn subscribers_receive_in_order() {
        let bus = ChangeBus::new();
        let mut rx = bus.subscribe();
        bus.publish(EntityChanged::priority("Default", "Metallica"));
        bus.publish(EntityChanged::attendance("Default", "Slayer"));
        assert_eq!(rx.try_recv().unwrap().ids, vec!["Metallica".to_string()]);
        assert_eq!(rx.try_recv().unwrap().kind, ChangeKind::Attendance);
    }
}
