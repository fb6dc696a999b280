use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use convoy_core::domain::notification::Notification;

/// What a stored notification announces. Transports may attach controls by kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeKind {
    /// Status change, issue report or resolution fan-out.
    TripUpdate,
    /// A driver was put on a trip and may confirm it.
    Assignment,
    /// Free text from one party to another.
    Message,
}

/// Pushes stored notifications to their recipients.
///
/// Delivery is best effort: the row is already committed when `publish` runs, and failures are
/// the implementation's to log.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, notification: &Notification, kind: NoticeKind);
}

/// Leaves notifications in the store only.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn publish(&self, _notification: &Notification, _kind: NoticeKind) {}
}

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    published: Arc<Mutex<Vec<(Notification, NoticeKind)>>>,
}

impl RecordingNotifier {
    pub fn published(&self) -> Vec<(Notification, NoticeKind)> {
        match self.published.lock() {
            Ok(published) => published.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn publish(&self, notification: &Notification, kind: NoticeKind) {
        let entry = (notification.clone(), kind);
        match self.published.lock() {
            Ok(mut published) => published.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}
