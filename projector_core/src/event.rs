//! This module defines the `StreamEvent` envelope delivered by an event log, and the
//! `NewStreamEvent` payload used to append to one.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An event as read from the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Log-wide position of the event. Positions start at 0 and increase monotonically.
    pub position: u64,

    /// Unique id of the message.
    pub message_id: Uuid,

    /// The stream the event was appended to.
    pub stream_id: String,

    /// The version of the event inside its stream.
    pub stream_version: u64,

    /// Event type
    ///
    /// The type of this event in PascalCase, like `StreetNameWasProposed`
    pub event_type: String,

    /// Event payload
    pub data: serde_json::Value,

    /// The time at which this event was appended
    pub created_at: DateTime<Utc>,
}

impl StreamEvent {
    /// Deserializes the payload into `T`.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

/// An event waiting to be appended. The log assigns its position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStreamEvent {
    /// Unique id of the message.
    pub message_id: Uuid,
    /// The stream the event is appended to.
    pub stream_id: String,
    /// Event type.
    pub event_type: String,
    /// Event payload.
    pub data: serde_json::Value,
}

impl NewStreamEvent {
    /// Creates a new event with a random message id.
    pub fn new(
        stream_id: impl Into<String>,
        event_type: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            stream_id: stream_id.into(),
            event_type: event_type.into(),
            data,
        }
    }

    /// Serializes `data` as the payload.
    pub fn from_data<T: Serialize>(
        stream_id: impl Into<String>,
        event_type: impl Into<String>,
        data: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(stream_id, event_type, serde_json::to_value(data)?))
    }

    /// Builds the stored form of this event.
    pub fn into_stream_event(self, position: u64, stream_version: u64) -> StreamEvent {
        StreamEvent {
            position,
            message_id: self.message_id,
            stream_id: self.stream_id,
            stream_version,
            event_type: self.event_type,
            data: self.data,
            created_at: Utc::now(),
        }
    }
}
