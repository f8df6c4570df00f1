//! Change events emitted by the storage service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Metadata attached to every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// Correlation ID for tracing related events (e.g. one batch).
    pub correlation_id: Option<Uuid>,
    /// Source component that generated the event.
    pub source: String,
}

impl EventMetadata {
    /// Create new event metadata.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            correlation_id: None,
            source: source.into(),
        }
    }

    /// Set correlation ID.
    #[must_use]
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self::new("unknown")
    }
}

/// A change to the entries of one scope.
///
/// `owner_type` and `owner_id` are both `None` for global entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// A key was written for the first time.
    Set {
        /// Event metadata.
        metadata: EventMetadata,
        /// Owner kind, `None` for global entries.
        owner_type: Option<String>,
        /// Owner identifier, `None` for global entries.
        owner_id: Option<i64>,
        /// Namespace, `None` for the default namespace.
        namespace: Option<String>,
        /// Normalized key.
        key: String,
        /// Stored value.
        value: Value,
        /// Time-to-live in seconds, `None` when the entry never expires.
        ttl: Option<u64>,
    },

    /// An existing key was overwritten.
    Updated {
        /// Event metadata.
        metadata: EventMetadata,
        /// Owner kind, `None` for global entries.
        owner_type: Option<String>,
        /// Owner identifier, `None` for global entries.
        owner_id: Option<i64>,
        /// Namespace, `None` for the default namespace.
        namespace: Option<String>,
        /// Normalized key.
        key: String,
        /// Value before the write.
        old_value: Value,
        /// Value after the write.
        new_value: Value,
    },

    /// A key was deleted.
    Deleted {
        /// Event metadata.
        metadata: EventMetadata,
        /// Owner kind, `None` for global entries.
        owner_type: Option<String>,
        /// Owner identifier, `None` for global entries.
        owner_id: Option<i64>,
        /// Namespace, `None` for the default namespace.
        namespace: Option<String>,
        /// Normalized key.
        key: String,
        /// Last value held by the key.
        value: Value,
    },

    /// Every entry of a scope was deleted.
    Cleared {
        /// Event metadata.
        metadata: EventMetadata,
        /// Owner kind, `None` for global entries.
        owner_type: Option<String>,
        /// Owner identifier, `None` for global entries.
        owner_id: Option<i64>,
        /// Namespace, `None` for the default namespace.
        namespace: Option<String>,
        /// Number of rows removed.
        count: u64,
    },
}

impl StoreEvent {
    /// Get the event metadata.
    #[must_use]
    pub fn metadata(&self) -> &EventMetadata {
        match self {
            Self::Set { metadata, .. }
            | Self::Updated { metadata, .. }
            | Self::Deleted { metadata, .. }
            | Self::Cleared { metadata, .. } => metadata,
        }
    }

    /// Get the event type as a string.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Set { .. } => "set",
            Self::Updated { .. } => "updated",
            Self::Deleted { .. } => "deleted",
            Self::Cleared { .. } => "cleared",
        }
    }

    /// The key this event concerns, `None` for [`StoreEvent::Cleared`].
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Set { key, .. } | Self::Updated { key, .. } | Self::Deleted { key, .. } => {
                Some(key)
            },
            Self::Cleared { .. } => None,
        }
    }

    /// The namespace of the scope that changed.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        match self {
            Self::Set { namespace, .. }
            | Self::Updated { namespace, .. }
            | Self::Deleted { namespace, .. }
            | Self::Cleared { namespace, .. } => namespace.as_deref(),
        }
    }
}
