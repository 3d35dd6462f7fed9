//! Lazy mode: run a hotel's PENDING searches one after another.
//!
//! A single runner task owns the per-hotel state and reacts to commands. The orchestrator sends
//! `JobFinished` whenever a run ends (completed, failed, cancelled or cleaned up); when it is the
//! run the runner waits on, it waits `delay` and then starts the next pending search, switching
//! itself off when the queue is empty. A hotel blocked by a RUNNING record no worker owns is
//! re-checked every `recheck` until the stale cleanup releases it.

use std::collections::{HashMap, VecDeque};
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::RateShopperError;
use crate::orchestrator::{ExtractionOrchestrator, Inner};
use crate::progress::ProgressEvent;

#[derive(Debug, Clone, PartialEq)]
pub enum LazyState {
    Idle,
    Running {
        /// Search the runner is waiting on
        current: Option<Uuid>,
        queue: VecDeque<Uuid>,
    },
}

impl LazyState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

pub(super) enum LazyCommand {
    Enable {
        hotel_id: Uuid,
        reply: oneshot::Sender<LazyState>,
    },
    Disable {
        hotel_id: Uuid,
        reply: oneshot::Sender<()>,
    },
    Status {
        hotel_id: Uuid,
        reply: oneshot::Sender<LazyState>,
    },
    JobFinished {
        hotel_id: Uuid,
        search_id: Uuid,
    },
    Advance {
        hotel_id: Uuid,
    },
}

struct LazyRunner {
    orchestrator: Weak<Inner>,
    tx: mpsc::WeakUnboundedSender<LazyCommand>,
    delay: Duration,
    recheck: Duration,
    hotels: HashMap<Uuid, LazyState>,
}

pub(super) fn spawn(
    orchestrator: Weak<Inner>,
    tx: mpsc::WeakUnboundedSender<LazyCommand>,
    rx: mpsc::UnboundedReceiver<LazyCommand>,
    delay: Duration,
    recheck: Duration,
) -> JoinHandle<()> {
    let runner = LazyRunner {
        orchestrator,
        tx,
        delay,
        recheck,
        hotels: HashMap::new(),
    };
    tokio::spawn(runner.run(rx))
}

impl LazyRunner {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<LazyCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                LazyCommand::Enable { hotel_id, reply } => {
                    let state = self.enable(hotel_id).await;
                    let _ = reply.send(state);
                }
                LazyCommand::Disable { hotel_id, reply } => {
                    if self.state(hotel_id).is_active() {
                        info!("Lazy mode disabled for hotel {}", hotel_id);
                        self.hotels.insert(hotel_id, LazyState::Idle);
                        self.announce(hotel_id, false);
                    }
                    let _ = reply.send(());
                }
                LazyCommand::Status { hotel_id, reply } => {
                    let _ = reply.send(self.state(hotel_id));
                }
                LazyCommand::JobFinished { hotel_id, search_id } => {
                    self.job_finished(hotel_id, search_id);
                }
                LazyCommand::Advance { hotel_id } => self.advance(hotel_id).await,
            }
        }
        debug!("Lazy mode runner stopped");
    }

    fn state(&self, hotel_id: Uuid) -> LazyState {
        self.hotels.get(&hotel_id).cloned().unwrap_or(LazyState::Idle)
    }

    fn orchestrator(&self) -> Option<ExtractionOrchestrator> {
        self.orchestrator
            .upgrade()
            .map(|inner| ExtractionOrchestrator { inner })
    }

    fn announce(&self, hotel_id: Uuid, active: bool) {
        if let Some(orchestrator) = self.orchestrator() {
            orchestrator
                .inner
                .progress
                .publish(ProgressEvent::LazyModeChanged { hotel_id, active });
        }
    }

    async fn enable(&mut self, hotel_id: Uuid) -> LazyState {
        let current = self.state(hotel_id);
        if current.is_active() {
            return current;
        }
        let Some(orchestrator) = self.orchestrator() else {
            return LazyState::Idle;
        };

        let pending = match orchestrator.pending_searches(hotel_id).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!("Lazy mode could not list searches for hotel {}: {}", hotel_id, e);
                return LazyState::Idle;
            }
        };
        if pending.is_empty() {
            info!("Lazy mode: no pending searches for hotel {}", hotel_id);
            self.announce(hotel_id, false);
            return LazyState::Idle;
        }

        info!("Lazy mode enabled for hotel {} with {} pending searches", hotel_id, pending.len());
        self.hotels.insert(
            hotel_id,
            LazyState::Running {
                current: None,
                queue: pending.into(),
            },
        );
        self.announce(hotel_id, true);
        self.advance(hotel_id).await;
        self.state(hotel_id)
    }

    fn job_finished(&mut self, hotel_id: Uuid, search_id: Uuid) {
        let Some(LazyState::Running { current, .. }) = self.hotels.get_mut(&hotel_id) else {
            return;
        };
        if let Some(waiting_on) = *current {
            if waiting_on != search_id {
                debug!("Lazy mode: ignoring end of search {}, waiting on {}", search_id, waiting_on);
                return;
            }
        }
        debug!("Lazy mode: search {} finished, next in {:?}", search_id, self.delay);
        *current = None;

        // Give the hotel slot a moment before admitting the next search
        self.schedule_advance(hotel_id, self.delay);
    }

    fn schedule_advance(&self, hotel_id: Uuid, after: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(LazyCommand::Advance { hotel_id });
            }
        });
    }

    /// Start the next queued search, or switch off when nothing is pending
    async fn advance(&mut self, hotel_id: Uuid) {
        let Some(orchestrator) = self.orchestrator() else {
            return;
        };
        let mut refreshed = false;

        loop {
            let next = match self.hotels.get_mut(&hotel_id) {
                Some(LazyState::Running { current: Some(_), .. }) => return,
                Some(LazyState::Running { queue, .. }) => queue.pop_front(),
                _ => return,
            };

            let Some(search_id) = next else {
                // Pick up searches created since the queue was built
                let fresh = if refreshed {
                    Vec::new()
                } else {
                    orchestrator.pending_searches(hotel_id).await.unwrap_or_default()
                };
                refreshed = true;
                if fresh.is_empty() {
                    info!("Lazy mode finished for hotel {}: no pending searches left", hotel_id);
                    self.hotels.insert(hotel_id, LazyState::Idle);
                    self.announce(hotel_id, false);
                    return;
                }
                if let Some(LazyState::Running { queue, .. }) = self.hotels.get_mut(&hotel_id) {
                    queue.extend(fresh);
                }
                continue;
            };

            match orchestrator.start_extraction(search_id).await {
                Ok(_handle) => {
                    info!("Lazy mode started search {} for hotel {}", search_id, hotel_id);
                    self.set_current(hotel_id, search_id);
                    return;
                }
                Err(RateShopperError::HotelBusy { running_search, .. }) => {
                    if let Some(LazyState::Running { queue, .. }) = self.hotels.get_mut(&hotel_id) {
                        queue.push_front(search_id);
                    }
                    if orchestrator.owns_run(hotel_id, running_search).await {
                        debug!("Lazy mode waiting for running search {}", running_search);
                        self.set_current(hotel_id, running_search);
                    } else {
                        // No JobFinished will come for an unowned record; retry once it may be stale
                        warn!(
                            "Lazy mode blocked by unowned running search {}, retrying in {:?}",
                            running_search, self.recheck
                        );
                        self.schedule_advance(hotel_id, self.recheck);
                    }
                    return;
                }
                Err(e) => warn!("Lazy mode skipping search {}: {}", search_id, e),
            }
        }
    }

    fn set_current(&mut self, hotel_id: Uuid, search_id: Uuid) {
        if let Some(LazyState::Running { current, .. }) = self.hotels.get_mut(&hotel_id) {
            *current = Some(search_id);
        }
    }
}
