use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tracing::warn;
use uuid::Uuid;

use crate::progress::polling::notice_key;
use crate::progress::{BroadcastSink, PollingSink, ProgressEvent, ProgressSink, SearchProgress};

/// Routes events between the push and polling sinks
#[derive(Clone)]
pub struct ProgressPublisher {
    push: Arc<BroadcastSink>,
    polling: Arc<PollingSink>,
}

impl ProgressPublisher {
    pub fn new(capacity: usize) -> Self {
        Self {
            push: Arc::new(BroadcastSink::new(capacity)),
            polling: Arc::new(PollingSink::new()),
        }
    }

    pub fn subscribe(&self, hotel_id: Uuid) -> ProgressSubscription {
        ProgressSubscription {
            hotel_id,
            rx: self.push.subscribe(hotel_id),
            seen_notices: self.polling.notice_keys(hotel_id).into_iter().collect(),
            polling: Arc::clone(&self.polling),
            backlog: VecDeque::new(),
            delivered: HashMap::new(),
            lazy_mode: None,
        }
    }

    /// Polling fallback: latest known progress of one search
    pub fn latest(&self, search_id: Uuid) -> Option<SearchProgress> {
        self.polling.latest(search_id)
    }

    pub fn poll(&self, hotel_id: Uuid) -> Vec<ProgressEvent> {
        self.polling.snapshot(hotel_id)
    }
}

impl ProgressSink for ProgressPublisher {
    fn publish(&self, event: ProgressEvent) {
        if self.push.is_connected(event.hotel_id()) {
            self.push.publish(event.clone());
        }
        self.polling.publish(event);
    }

    fn is_connected(&self, hotel_id: Uuid) -> bool {
        self.push.is_connected(hotel_id)
    }
}

/// Per-hotel event stream that recovers from missed events by polling.
///
/// Progress for a search is delivered in order: an update older than one already delivered is
/// skipped, so nothing follows a run's terminal update except a later attempt.
pub struct ProgressSubscription {
    hotel_id: Uuid,
    rx: broadcast::Receiver<ProgressEvent>,
    polling: Arc<PollingSink>,
    backlog: VecDeque<ProgressEvent>,
    /// search id -> sequence of the last delivered update
    delivered: HashMap<Uuid, (u32, u32, u8)>,
    seen_notices: HashSet<(Uuid, u32)>,
    lazy_mode: Option<bool>,
}

impl ProgressSubscription {
    pub fn hotel_id(&self) -> Uuid {
        self.hotel_id
    }

    /// Next event, or `None` once the publisher is gone
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        loop {
            let event = match self.backlog.pop_front() {
                Some(event) => event,
                None => match self.rx.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(
                            "Missed {} progress events for hotel {}, falling back to polling",
                            missed, self.hotel_id
                        );
                        self.resync();
                        continue;
                    }
                    Err(RecvError::Closed) => return None,
                },
            };
            if self.admit(&event) {
                return Some(event);
            }
        }
    }

    /// Drop what is still buffered and replace it with the polling snapshot, which is newer
    fn resync(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        let lazy_mode = self.lazy_mode;
        let snapshot = self.polling.snapshot(self.hotel_id);
        self.backlog.extend(snapshot.into_iter().filter(|event| match event {
            ProgressEvent::LazyModeChanged { active, .. } => Some(*active) != lazy_mode,
            _ => true,
        }));
    }

    fn admit(&mut self, event: &ProgressEvent) -> bool {
        match event {
            ProgressEvent::Progress(progress) => {
                let sequence = progress.sequence();
                match self.delivered.get(&progress.search_id) {
                    Some(last) if *last >= sequence => false,
                    _ => {
                        self.delivered.insert(progress.search_id, sequence);
                        true
                    }
                }
            }
            ProgressEvent::ExtractionCleaned { .. } => match notice_key(event) {
                Some(key) => self.seen_notices.insert(key),
                None => true,
            },
            ProgressEvent::SearchDeleted { search_id, .. } => {
                self.delivered.remove(search_id);
                true
            }
            ProgressEvent::LazyModeChanged { active, .. } => {
                self.lazy_mode = Some(*active);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SearchStatus;
    use chrono::Utc;

    fn progress(hotel_id: Uuid, search_id: Uuid, processed: u32) -> ProgressEvent {
        progress_in(hotel_id, search_id, processed, SearchStatus::Running)
    }

    fn progress_in(hotel_id: Uuid, search_id: Uuid, processed: u32, status: SearchStatus) -> ProgressEvent {
        ProgressEvent::Progress(SearchProgress {
            search_id,
            hotel_id,
            status,
            attempt: 1,
            processed_dates: processed,
            total_dates: 10,
            total_prices_found: processed,
            property_name: "Hotel Azul".to_string(),
            error_log: None,
            timestamp: Utc::now(),
        })
    }

    #[tokio::test]
    async fn polling_sink_is_updated_without_subscribers() {
        let publisher = ProgressPublisher::new(8);
        let hotel = Uuid::new_v4();
        let search = Uuid::new_v4();
        assert!(!publisher.is_connected(hotel));

        publisher.publish(progress(hotel, search, 1));
        assert_eq!(publisher.latest(search).unwrap().processed_dates, 1);
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let publisher = ProgressPublisher::new(8);
        let hotel = Uuid::new_v4();
        let search = Uuid::new_v4();
        let mut subscription = publisher.subscribe(hotel);

        for processed in 1..=3 {
            publisher.publish(progress(hotel, search, processed));
        }
        for expected in 1..=3 {
            match subscription.next().await {
                Some(ProgressEvent::Progress(p)) => assert_eq!(p.processed_dates, expected),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn lagging_subscriber_falls_back_to_polling() {
        let publisher = ProgressPublisher::new(2);
        let hotel = Uuid::new_v4();
        let search = Uuid::new_v4();
        let mut subscription = publisher.subscribe(hotel);

        for processed in 1..=6 {
            publisher.publish(progress(hotel, search, processed));
        }

        match subscription.next().await {
            Some(ProgressEvent::Progress(p)) => assert_eq!(p.processed_dates, 6),
            other => panic!("unexpected event {:?}", other),
        }
    }

    async fn next_progress(subscription: &mut ProgressSubscription) -> SearchProgress {
        match subscription.next().await {
            Some(ProgressEvent::Progress(p)) => p,
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn delivery_stays_ordered_after_lag() {
        let publisher = ProgressPublisher::new(2);
        let hotel = Uuid::new_v4();
        let search = Uuid::new_v4();
        let mut subscription = publisher.subscribe(hotel);

        for processed in 1..=6 {
            publisher.publish(progress(hotel, search, processed));
        }
        let mut delivered = vec![next_progress(&mut subscription).await];

        publisher.publish(progress(hotel, search, 7));
        delivered.push(next_progress(&mut subscription).await);

        // A late duplicate of an older update is skipped
        publisher.publish(progress(hotel, search, 3));
        publisher.publish(progress_in(hotel, search, 7, SearchStatus::Completed));
        delivered.push(next_progress(&mut subscription).await);

        publisher.publish(progress(hotel, search, 7));
        let other = Uuid::new_v4();
        publisher.publish(progress(hotel, other, 1));
        delivered.push(next_progress(&mut subscription).await);

        let seen: Vec<(u32, SearchStatus)> = delivered.iter().map(|p| (p.processed_dates, p.status)).collect();
        assert_eq!(
            seen,
            vec![
                (6, SearchStatus::Running),
                (7, SearchStatus::Running),
                (7, SearchStatus::Completed),
                (1, SearchStatus::Running),
            ]
        );
        assert_eq!(delivered[3].search_id, other);
    }

    #[tokio::test]
    async fn lag_does_not_replay_old_notices() {
        let publisher = ProgressPublisher::new(2);
        let hotel = Uuid::new_v4();
        let search = Uuid::new_v4();
        publisher.publish(ProgressEvent::ExtractionCleaned {
            hotel_id: hotel,
            search_id: Uuid::new_v4(),
            attempt: 1,
            message: "cleaned before subscribing".to_string(),
        });

        let mut subscription = publisher.subscribe(hotel);
        for processed in 1..=6 {
            publisher.publish(progress(hotel, search, processed));
        }
        assert_eq!(next_progress(&mut subscription).await.processed_dates, 6);

        publisher.publish(ProgressEvent::LazyModeChanged { hotel_id: hotel, active: false });
        assert_eq!(
            subscription.next().await,
            Some(ProgressEvent::LazyModeChanged { hotel_id: hotel, active: false })
        );
    }
}
