use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::progress::{ProgressEvent, ProgressSink};

/// Push delivery: one broadcast channel per hotel
pub struct BroadcastSink {
    channels: Mutex<HashMap<Uuid, broadcast::Sender<ProgressEvent>>>,
    capacity: usize,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Receive every event published for the hotel after this call
    pub fn subscribe(&self, hotel_id: Uuid) -> broadcast::Receiver<ProgressEvent> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(hotel_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, hotel_id: Uuid) -> usize {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.get(&hotel_id).map(|tx| tx.receiver_count()).unwrap_or(0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl ProgressSink for BroadcastSink {
    fn publish(&self, event: ProgressEvent) {
        let hotel_id = event.hotel_id();
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = channels.get(&hotel_id) {
            if tx.send(event).is_err() {
                // Last subscriber went away
                debug!("Dropping progress channel for hotel {}", hotel_id);
                channels.remove(&hotel_id);
            }
        }
    }

    fn is_connected(&self, hotel_id: Uuid) -> bool {
        self.subscriber_count(hotel_id) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lazy_event(hotel_id: Uuid, active: bool) -> ProgressEvent {
        ProgressEvent::LazyModeChanged { hotel_id, active }
    }

    #[tokio::test]
    async fn events_only_reach_their_hotel() {
        let sink = BroadcastSink::new(16);
        let hotel_a = Uuid::new_v4();
        let hotel_b = Uuid::new_v4();
        let mut rx_a = sink.subscribe(hotel_a);
        let mut rx_b = sink.subscribe(hotel_b);

        sink.publish(lazy_event(hotel_a, true));

        assert_eq!(rx_a.recv().await.unwrap(), lazy_event(hotel_a, true));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn health_tracks_subscribers() {
        let sink = BroadcastSink::new(4);
        let hotel = Uuid::new_v4();
        assert!(!sink.is_connected(hotel));

        let rx = sink.subscribe(hotel);
        assert!(sink.is_connected(hotel));

        drop(rx);
        assert!(!sink.is_connected(hotel));
        sink.publish(lazy_event(hotel, false));
        assert_eq!(sink.subscriber_count(hotel), 0);
    }
}
