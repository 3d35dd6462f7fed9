use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::progress::{ProgressEvent, ProgressSink, SearchProgress};

#[derive(Default)]
struct HotelState {
    searches: HashMap<Uuid, SearchProgress>,
    lazy_mode: Option<bool>,
    notices: Vec<ProgressEvent>,
}

/// Keeps the latest state per hotel so clients can poll instead of subscribing
#[derive(Default)]
pub struct PollingSink {
    hotels: Mutex<HashMap<Uuid, HotelState>>,
}

const MAX_NOTICES: usize = 32;

impl PollingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self, search_id: Uuid) -> Option<SearchProgress> {
        let hotels = self.hotels.lock().unwrap_or_else(|e| e.into_inner());
        hotels
            .values()
            .find_map(|hotel| hotel.searches.get(&search_id).cloned())
    }

    /// Current state of every known search for the hotel plus lazy-mode state and recent notices
    pub fn snapshot(&self, hotel_id: Uuid) -> Vec<ProgressEvent> {
        let hotels = self.hotels.lock().unwrap_or_else(|e| e.into_inner());
        let Some(hotel) = hotels.get(&hotel_id) else {
            return Vec::new();
        };

        let mut searches: Vec<&SearchProgress> = hotel.searches.values().collect();
        searches.sort_by_key(|p| p.timestamp);

        let mut events: Vec<ProgressEvent> = hotel.notices.clone();
        events.extend(searches.into_iter().cloned().map(ProgressEvent::Progress));
        if let Some(active) = hotel.lazy_mode {
            events.push(ProgressEvent::LazyModeChanged { hotel_id, active });
        }
        events
    }

    /// (search, attempt) of every cleanup notice currently kept for the hotel
    pub fn notice_keys(&self, hotel_id: Uuid) -> Vec<(Uuid, u32)> {
        let hotels = self.hotels.lock().unwrap_or_else(|e| e.into_inner());
        hotels
            .get(&hotel_id)
            .map(|hotel| hotel.notices.iter().filter_map(notice_key).collect())
            .unwrap_or_default()
    }
}

pub(crate) fn notice_key(event: &ProgressEvent) -> Option<(Uuid, u32)> {
    match event {
        ProgressEvent::ExtractionCleaned { search_id, attempt, .. } => Some((*search_id, *attempt)),
        _ => None,
    }
}

impl ProgressSink for PollingSink {
    fn publish(&self, event: ProgressEvent) {
        let mut hotels = self.hotels.lock().unwrap_or_else(|e| e.into_inner());
        let hotel = hotels.entry(event.hotel_id()).or_default();
        match event {
            ProgressEvent::Progress(progress) => {
                let newer = hotel
                    .searches
                    .get(&progress.search_id)
                    .map(|current| current.sequence() <= progress.sequence())
                    .unwrap_or(true);
                if newer {
                    hotel.searches.insert(progress.search_id, progress);
                }
            }
            ProgressEvent::SearchDeleted { search_id, .. } => {
                hotel.searches.remove(&search_id);
            }
            ProgressEvent::LazyModeChanged { active, .. } => hotel.lazy_mode = Some(active),
            notice @ ProgressEvent::ExtractionCleaned { .. } => {
                if hotel.notices.len() >= MAX_NOTICES {
                    hotel.notices.remove(0);
                }
                hotel.notices.push(notice);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SearchStatus;
    use chrono::{Duration, Utc};

    fn progress(hotel_id: Uuid, search_id: Uuid, processed: u32, offset: i64) -> SearchProgress {
        SearchProgress {
            search_id,
            hotel_id,
            status: SearchStatus::Running,
            attempt: 1,
            processed_dates: processed,
            total_dates: 3,
            total_prices_found: processed,
            property_name: "Hotel Azul".to_string(),
            error_log: None,
            timestamp: Utc::now() + Duration::seconds(offset),
        }
    }

    #[test]
    fn keeps_latest_progress_per_search() {
        let sink = PollingSink::new();
        let hotel = Uuid::new_v4();
        let search = Uuid::new_v4();

        sink.publish(ProgressEvent::Progress(progress(hotel, search, 2, 10)));
        sink.publish(ProgressEvent::Progress(progress(hotel, search, 1, 0)));

        assert_eq!(sink.latest(search).unwrap().processed_dates, 2);
        assert_eq!(sink.snapshot(hotel).len(), 1);
    }

    #[test]
    fn snapshot_includes_notices_and_lazy_state() {
        let sink = PollingSink::new();
        let hotel = Uuid::new_v4();
        let search = Uuid::new_v4();

        sink.publish(ProgressEvent::ExtractionCleaned {
            hotel_id: hotel,
            search_id: search,
            attempt: 1,
            message: "extraction cleaned".to_string(),
        });
        sink.publish(ProgressEvent::LazyModeChanged { hotel_id: hotel, active: true });

        let events = sink.snapshot(hotel);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ProgressEvent::ExtractionCleaned { .. }));
        assert_eq!(events[1], ProgressEvent::LazyModeChanged { hotel_id: hotel, active: true });
        assert!(sink.snapshot(Uuid::new_v4()).is_empty());
    }

    #[test]
    fn deleted_searches_are_forgotten() {
        let sink = PollingSink::new();
        let hotel = Uuid::new_v4();
        let kept = Uuid::new_v4();
        let deleted = Uuid::new_v4();

        sink.publish(ProgressEvent::Progress(progress(hotel, kept, 1, 0)));
        sink.publish(ProgressEvent::Progress(progress(hotel, deleted, 3, 0)));
        sink.publish(ProgressEvent::SearchDeleted { hotel_id: hotel, search_id: deleted });

        assert!(sink.latest(deleted).is_none());
        assert_eq!(sink.snapshot(hotel).len(), 1);
        assert_eq!(sink.latest(kept).unwrap().processed_dates, 1);
    }

    #[test]
    fn later_attempt_replaces_finished_run() {
        let sink = PollingSink::new();
        let hotel = Uuid::new_v4();
        let search = Uuid::new_v4();

        let mut failed = progress(hotel, search, 2, 0);
        failed.status = SearchStatus::Failed;
        let mut retry = progress(hotel, search, 0, 0);
        retry.attempt = 2;

        sink.publish(ProgressEvent::Progress(failed));
        sink.publish(ProgressEvent::Progress(retry));
        let latest = sink.latest(search).unwrap();
        assert_eq!((latest.attempt, latest.processed_dates), (2, 0));
    }
}
