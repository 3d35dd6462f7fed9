//! Extraction job orchestration.
//!
//! The orchestrator owns every status transition of a [`SearchRecord`]. It admits at most one
//! RUNNING search per hotel, drives each admitted search date by date on its own task, cleans up
//! orphaned runs and feeds the lazy-mode runner that works through a hotel's pending queue.
//!
//! ```text
//! create_search ─► PENDING ──start──► RUNNING ──► COMPLETED
//!                     CANCELLED ◄─stop──┤ ├──fatal──► FAILED
//!                     (resume) ─────────┘ └◄──retry───┘
//! ```

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::OrchestratorConfig;
use crate::error::{RateShopperError, Result};
use crate::models::{CreateSearch, LiveProgress, SearchRecord, SearchStatus};
use crate::progress::{ProgressEvent, ProgressSink, SearchProgress};
use crate::scrapers::PriceScraper;
use crate::store::{JobStore, PropertyStore, SearchStore};

mod lazy;
mod worker;


pub use lazy::LazyState;
use lazy::LazyCommand;

/// The run currently holding a hotel's single-flight slot
struct ActiveRun {
    search_id: Uuid,
    attempt: u32,
    cancel: CancellationToken,
}

struct Inner {
    store: Arc<dyn JobStore>,
    scraper: Arc<dyn PriceScraper>,
    progress: Arc<dyn ProgressSink>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    /// hotel id -> active run. Status changes of RUNNING searches happen under this lock.
    active: Mutex<HashMap<Uuid, ActiveRun>>,
    lazy_tx: mpsc::UnboundedSender<LazyCommand>,
}

#[derive(Clone)]
pub struct ExtractionOrchestrator {
    inner: Arc<Inner>,
}

/// Result of a stop request
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    /// The running search was signalled and will cancel after its current date
    Stopping { search_id: Uuid },
    /// Nothing was running; lists orphaned searches that were cleaned up
    NothingRunning { cleaned: Vec<Uuid> },
}

/// Handle to a spawned extraction
pub struct ExtractionHandle {
    search_id: Uuid,
    join: JoinHandle<()>,
}

impl ExtractionHandle {
    pub fn search_id(&self) -> Uuid {
        self.search_id
    }

    /// Wait for the worker to stop, whatever the final status
    pub async fn finished(self) -> Result<()> {
        let search_id = self.search_id;
        self.join
            .await
            .map_err(|e| RateShopperError::Extraction(format!("worker for {} aborted: {}", search_id, e)))
    }
}

impl ExtractionOrchestrator {
    /// Must be called inside a tokio runtime: spawns the lazy-mode runner.
    pub fn new(
        store: Arc<dyn JobStore>,
        scraper: Arc<dyn PriceScraper>,
        progress: Arc<dyn ProgressSink>,
        clock: Arc<dyn Clock>,
        config: OrchestratorConfig,
    ) -> Self {
        let (lazy_tx, lazy_rx) = mpsc::unbounded_channel();
        let delay = config.lazy_mode_delay();
        let recheck = config.stale_sweep_interval();
        let inner = Arc::new(Inner {
            store,
            scraper,
            progress,
            clock,
            config,
            active: Mutex::new(HashMap::new()),
            lazy_tx,
        });
        lazy::spawn(Arc::downgrade(&inner), inner.lazy_tx.downgrade(), lazy_rx, delay, recheck);
        Self { inner }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    fn publish(&self, record: &SearchRecord) {
        self.inner
            .progress
            .publish(ProgressEvent::Progress(SearchProgress::of(record)));
    }

    fn notify_finished(&self, hotel_id: Uuid, search_id: Uuid) {
        if self
            .inner
            .lazy_tx
            .send(LazyCommand::JobFinished { hotel_id, search_id })
            .is_err()
        {
            debug!("Lazy runner gone, not forwarding end of {}", search_id);
        }
    }

    /// Validate and store a new PENDING search
    pub async fn create_search(&self, request: CreateSearch) -> Result<SearchRecord> {
        request.validate(self.inner.clock.today())?;
        let property = self.inner.store.get_property(request.property_id).await?;
        if !property.active {
            return Err(RateShopperError::validation(format!(
                "property {} is not active",
                property.name
            )));
        }

        let record = SearchRecord::new(&property, &request, self.now());
        let record = self.inner.store.insert_search(record).await?;
        info!(
            "Created search {} for {} ({} to {}, {} dates)",
            record.id, property.name, record.start_date, record.end_date, record.total_dates
        );
        self.publish(&record);
        Ok(record)
    }

    /// Admit a search into RUNNING and spawn its worker
    pub async fn start_extraction(&self, search_id: Uuid) -> Result<ExtractionHandle> {
        let mut active = self.inner.active.lock().await;

        let hotel_id = self.inner.store.get_search(search_id).await?.hotel_id;
        self.reap_locked(&mut active, Some(hotel_id), false).await?;

        if let Some(run) = active.get(&hotel_id) {
            warn!("Hotel {} busy with search {}, rejecting {}", hotel_id, run.search_id, search_id);
            return Err(RateShopperError::HotelBusy {
                hotel_id,
                running_search: run.search_id,
            });
        }
        // RUNNING in the store but not owned here and not yet stale
        let untracked = self
            .inner
            .store
            .list_searches(hotel_id)
            .await?
            .into_iter()
            .find(|s| s.status == SearchStatus::Running && s.id != search_id);
        if let Some(other) = untracked {
            warn!("Hotel {} has unowned running search {}", hotel_id, other.id);
            return Err(RateShopperError::HotelBusy {
                hotel_id,
                running_search: other.id,
            });
        }

        let mut record = self.inner.store.get_search(search_id).await?;
        let resumed_from = record.status;
        record.begin_run(self.now())?;
        self.inner.store.update_search(record.clone()).await?;

        let cancel = CancellationToken::new();
        active.insert(
            hotel_id,
            ActiveRun {
                search_id,
                attempt: record.attempt,
                cancel: cancel.clone(),
            },
        );
        self.publish(&record);
        drop(active);

        info!(
            "Starting extraction {} for {} from {} ({}/{} dates done, attempt {})",
            search_id,
            record.property_name,
            resumed_from,
            record.processed_dates,
            record.total_dates,
            record.attempt
        );

        let span = info_span!(
            "extraction",
            search_id = %search_id,
            hotel_id = %hotel_id,
            attempt = record.attempt
        );
        let orchestrator = self.clone();
        let join = tokio::spawn(worker::run(orchestrator, record, cancel).instrument(span));
        Ok(ExtractionHandle { search_id, join })
    }

    /// Signal the hotel's running search to stop. Also cleans up orphaned RUNNING records.
    pub async fn stop_extraction(&self, hotel_id: Uuid) -> Result<StopOutcome> {
        let mut active = self.inner.active.lock().await;
        let cleaned = self.reap_locked(&mut active, Some(hotel_id), true).await?;

        match active.get(&hotel_id) {
            Some(run) => {
                info!("Stop requested for search {} (hotel {})", run.search_id, hotel_id);
                run.cancel.cancel();
                Ok(StopOutcome::Stopping { search_id: run.search_id })
            }
            None => {
                if cleaned.is_empty() {
                    debug!("Stop requested for hotel {} with nothing running", hotel_id);
                }
                Ok(StopOutcome::NothingRunning { cleaned })
            }
        }
    }

    /// Remove a search in any state but RUNNING
    pub async fn delete_search(&self, search_id: Uuid) -> Result<()> {
        let _active = self.inner.active.lock().await;
        let record = self.inner.store.get_search(search_id).await?;
        if record.status == SearchStatus::Running {
            return Err(RateShopperError::SearchRunning(search_id));
        }
        self.inner.store.delete_search(search_id).await?;
        info!("Deleted search {} ({})", search_id, record.status);
        self.inner.progress.publish(ProgressEvent::SearchDeleted {
            hotel_id: record.hotel_id,
            search_id,
        });
        Ok(())
    }

    pub async fn get_search(&self, search_id: Uuid) -> Result<SearchRecord> {
        self.inner.store.get_search(search_id).await
    }

    pub async fn live_progress(&self, search_id: Uuid) -> Result<LiveProgress> {
        let record = self.inner.store.get_search(search_id).await?;
        Ok(record.live_progress(self.now()))
    }

    /// Whether a worker in this process currently runs `search_id` for the hotel
    async fn owns_run(&self, hotel_id: Uuid, search_id: Uuid) -> bool {
        self.inner
            .active
            .lock()
            .await
            .get(&hotel_id)
            .map(|run| run.search_id == search_id)
            .unwrap_or(false)
    }

    /// PENDING searches of a hotel in creation order
    pub async fn pending_searches(&self, hotel_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .inner
            .store
            .list_searches(hotel_id)
            .await?
            .into_iter()
            .filter(|s| s.status == SearchStatus::Pending)
            .map(|s| s.id)
            .collect())
    }

    /// Force-fail every RUNNING search that stopped reporting progress
    pub async fn sweep_stale(&self) -> Result<Vec<Uuid>> {
        let mut active = self.inner.active.lock().await;
        self.reap_locked(&mut active, None, false).await
    }

    /// Run [`sweep_stale`](Self::sweep_stale) periodically until the orchestrator is dropped
    pub fn spawn_stale_sweeper(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.stale_sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let orchestrator = ExtractionOrchestrator { inner };
                match orchestrator.sweep_stale().await {
                    Ok(cleaned) if !cleaned.is_empty() => {
                        info!("Stale sweep cleaned {} searches", cleaned.len())
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Stale sweep failed: {}", e),
                }
            }
        })
    }

    /// Fail stale RUNNING searches (and, when `claim_untracked`, RUNNING searches no live
    /// worker owns) and release their hotels.
    async fn reap_locked(
        &self,
        active: &mut HashMap<Uuid, ActiveRun>,
        hotel_id: Option<Uuid>,
        claim_untracked: bool,
    ) -> Result<Vec<Uuid>> {
        let now = self.now();
        let timeout = self.inner.config.stale_after();
        let running = match hotel_id {
            Some(hotel_id) => self
                .inner
                .store
                .list_searches(hotel_id)
                .await?
                .into_iter()
                .filter(|s| s.status == SearchStatus::Running)
                .collect(),
            None => self.inner.store.running_searches().await?,
        };

        let mut cleaned = Vec::new();
        for mut record in running {
            let tracked = active
                .get(&record.hotel_id)
                .map(|run| run.search_id == record.id && run.attempt == record.attempt)
                .unwrap_or(false);
            let stale = record.is_stale(now, timeout);
            if !stale && (tracked || !claim_untracked) {
                continue;
            }

            let err = RateShopperError::StaleJob {
                search_id: record.id,
                idle_secs: (now - record.updated_at).num_seconds(),
            };
            warn!("Cleaning up orphaned extraction: {}", err);
            record.fail(err.to_string(), now)?;
            self.inner.store.update_search(record.clone()).await?;

            if let Some(run) = active.get(&record.hotel_id) {
                if run.search_id == record.id {
                    run.cancel.cancel();
                    active.remove(&record.hotel_id);
                }
            }

            self.inner.progress.publish(ProgressEvent::ExtractionCleaned {
                hotel_id: record.hotel_id,
                search_id: record.id,
                attempt: record.attempt,
                message: format!(
                    "Extraction for {} was cleaned up after it stopped responding",
                    record.property_name
                ),
            });
            self.publish(&record);
            self.notify_finished(record.hotel_id, record.id);
            cleaned.push(record.id);
        }
        Ok(cleaned)
    }

    /// Apply a change to a running search if `attempt` still owns it.
    ///
    /// Returns `None` when the run was superseded (stale cleanup), in which case nothing is
    /// written.
    async fn commit<F>(
        &self,
        hotel_id: Uuid,
        search_id: Uuid,
        attempt: u32,
        apply: F,
    ) -> Result<Option<SearchRecord>>
    where
        F: FnOnce(&mut SearchRecord, DateTime<Utc>) -> Result<()>,
    {
        let mut active = self.inner.active.lock().await;
        let owns = active
            .get(&hotel_id)
            .map(|run| run.search_id == search_id && run.attempt == attempt)
            .unwrap_or(false);
        if !owns {
            return Ok(None);
        }

        let mut record = self.inner.store.get_search(search_id).await?;
        if record.status != SearchStatus::Running || record.attempt != attempt {
            return Ok(None);
        }
        apply(&mut record, self.now())?;
        self.inner.store.update_search(record.clone()).await?;

        if record.status.ends_run() {
            active.remove(&hotel_id);
        }
        self.publish(&record);
        if record.status.ends_run() {
            self.notify_finished(hotel_id, search_id);
        }
        Ok(Some(record))
    }

    pub async fn enable_lazy_mode(&self, hotel_id: Uuid) -> Result<LazyState> {
        let (reply, rx) = oneshot::channel();
        self.send_lazy(LazyCommand::Enable { hotel_id, reply })?;
        rx.await.map_err(|_| lazy_runner_gone())
    }

    pub async fn disable_lazy_mode(&self, hotel_id: Uuid) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send_lazy(LazyCommand::Disable { hotel_id, reply })?;
        rx.await.map_err(|_| lazy_runner_gone())
    }

    pub async fn lazy_mode_status(&self, hotel_id: Uuid) -> Result<LazyState> {
        let (reply, rx) = oneshot::channel();
        self.send_lazy(LazyCommand::Status { hotel_id, reply })?;
        rx.await.map_err(|_| lazy_runner_gone())
    }

    fn send_lazy(&self, command: LazyCommand) -> Result<()> {
        self.inner.lazy_tx.send(command).map_err(|_| lazy_runner_gone())
    }
}

fn lazy_runner_gone() -> RateShopperError {
    RateShopperError::Extraction("lazy mode runner is not running".to_string())
}
