//! The change-notification hook.

use crate::event::StoreEvent;

/// Receives change events from a storage service.
///
/// Delivery is fire-and-forget: `notify` cannot fail and the caller never
/// waits for, retries or inspects delivery. Implementations must not block
/// for long, since they run on the caller's task right after the write.
pub trait ChangeNotifier: Send + Sync {
    /// Deliver one event.
    fn notify(&self, event: StoreEvent);
}

/// Notifier that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl ChangeNotifier for NoopNotifier {
    fn notify(&self, _event: StoreEvent) {}
}

impl<F> ChangeNotifier for F
where
    F: Fn(StoreEvent) + Send + Sync,
{
    fn notify(&self, event: StoreEvent) {
        self(event);
    }
}
