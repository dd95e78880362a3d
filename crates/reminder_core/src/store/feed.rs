use crate::model::Task;
use crossbeam_channel::Receiver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// Who caused a write. Handle write-backs are tagged so their events can be
/// recognised and skipped by the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    User,
    Synchronizer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub seq: u64,
    pub kind: ChangeKind,
    pub origin: WriteOrigin,
    pub before: Option<Task>,
    pub after: Option<Task>,
}

impl ChangeEvent {
    pub fn task_id(&self) -> &str {
        self.after
            .as_ref()
            .or(self.before.as_ref())
            .map(|task| task.id.as_str())
            .unwrap_or_default()
    }

    pub fn reminder_changed(&self) -> bool {
        let before = self.before.as_ref().and_then(|task| task.reminder_time);
        let after = self.after.as_ref().and_then(|task| task.reminder_time);
        before != after
    }
}

/// Live subscription to the record store.
///
/// Yields events in the order the store applied them, starting at the moment
/// of subscription. Iteration blocks until the next event and ends once the
/// store is dropped.
pub struct ChangeFeed {
    receiver: Receiver<ChangeEvent>,
}

impl ChangeFeed {
    pub(crate) fn new(receiver: Receiver<ChangeEvent>) -> Self {
        Self { receiver }
    }

    /// Next queued event without blocking.
    pub fn try_next(&self) -> Option<ChangeEvent> {
        self.receiver.try_recv().ok()
    }

    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    pub(crate) fn receiver(&self) -> &Receiver<ChangeEvent> {
        &self.receiver
    }
}

impl Iterator for ChangeFeed {
    type Item = ChangeEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.recv().ok()
    }
}
