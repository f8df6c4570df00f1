//! Datastore Events - change notification for the scoped data store.
//!
//! This crate provides:
//! - [`StoreEvent`], the four kinds of change a storage service reports
//! - [`ChangeNotifier`], the fire-and-forget hook the storage service calls
//! - [`EventBus`], a broadcast-based notifier with synchronous subscribers
//!
//! # Delivery
//!
//! Notification is infallible from the caller's point of view. The storage
//! mutation has already committed when a notifier runs, and nothing a
//! subscriber does (including panicking) can undo it.
//!
//! # Example
//!
//! ```rust
//! use datastore_events::{ChangeNotifier, EventBus, EventMetadata, StoreEvent};
//!
//! # async fn example() {
//! let bus = EventBus::new();
//! let mut receiver = bus.subscribe();
//!
//! bus.notify(StoreEvent::Cleared {
//!     metadata: EventMetadata::new("storage"),
//!     owner_type: None,
//!     owner_id: None,
//!     namespace: Some("settings".to_string()),
//!     count: 3,
//! });
//!
//! let event = receiver.recv().await.unwrap();
//! assert_eq!(event.event_type(), "cleared");
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod bus;
mod event;
mod notifier;
mod subscriber;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventReceiver};
pub use event::{EventMetadata, StoreEvent};
pub use notifier::{ChangeNotifier, NoopNotifier};
pub use subscriber::{
    EventFilter, EventSubscriber, FilterSubscriber, SubscriberId, SubscriberRegistry,
};
