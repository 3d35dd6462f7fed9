//! Progress notifications for running extractions.
//!
//! Events are delivered through a [`ProgressSink`]. The [`ProgressPublisher`] routes each event
//! to the push sink when the hotel has live subscribers and always records it in the polling
//! sink, which is what clients read after missing pushed events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{SearchRecord, SearchStatus};

pub mod broadcast;
pub mod polling;
pub mod publisher;

pub use broadcast::BroadcastSink;
pub use polling::PollingSink;
pub use publisher::{ProgressPublisher, ProgressSubscription};

/// Snapshot of a search as seen by observers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchProgress {
    pub search_id: Uuid,
    pub hotel_id: Uuid,
    pub status: SearchStatus,
    /// Run attempt of the search when this update was taken
    #[serde(default)]
    pub attempt: u32,
    pub processed_dates: u32,
    pub total_dates: u32,
    pub total_prices_found: u32,
    pub property_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_log: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SearchProgress {
    pub fn of(search: &SearchRecord) -> Self {
        Self {
            search_id: search.id,
            hotel_id: search.hotel_id,
            status: search.status,
            attempt: search.attempt,
            processed_dates: search.processed_dates,
            total_dates: search.total_dates,
            total_prices_found: search.total_prices_found,
            property_name: search.property_name.clone(),
            error_log: search.error_log.clone(),
            timestamp: search.updated_at,
        }
    }

    /// Position of this update in the search's lifetime. Later updates compare greater, and a
    /// run's terminal update sorts after every RUNNING update of that run.
    pub fn sequence(&self) -> (u32, u32, u8) {
        let phase = match self.status {
            SearchStatus::Pending => 0,
            SearchStatus::Running => 1,
            _ => 2,
        };
        (self.attempt, self.processed_dates, phase)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress(SearchProgress),

    /// A stale RUNNING search was force-failed and its hotel released
    ExtractionCleaned {
        hotel_id: Uuid,
        search_id: Uuid,
        /// Attempt that was cleaned up
        attempt: u32,
        message: String,
    },

    SearchDeleted { hotel_id: Uuid, search_id: Uuid },

    LazyModeChanged { hotel_id: Uuid, active: bool },
}

impl ProgressEvent {
    pub fn hotel_id(&self) -> Uuid {
        match self {
            Self::Progress(progress) => progress.hotel_id,
            Self::ExtractionCleaned { hotel_id, .. } => *hotel_id,
            Self::SearchDeleted { hotel_id, .. } => *hotel_id,
            Self::LazyModeChanged { hotel_id, .. } => *hotel_id,
        }
    }

    pub fn search_id(&self) -> Option<Uuid> {
        match self {
            Self::Progress(progress) => Some(progress.search_id),
            Self::ExtractionCleaned { search_id, .. } => Some(*search_id),
            Self::SearchDeleted { search_id, .. } => Some(*search_id),
            Self::LazyModeChanged { .. } => None,
        }
    }
}

/// Destination for progress events. Publishing never blocks the caller.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, event: ProgressEvent);

    /// Connectivity health check for a hotel's observers
    fn is_connected(&self, _hotel_id: Uuid) -> bool {
        true
    }
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn publish(&self, _event: ProgressEvent) {}
}
