use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{RateShopperError, Result};
use crate::models::{PriceObservation, Property, SearchRecord};
use crate::orchestrator::ExtractionOrchestrator;
use crate::pricing::PriceNormalizer;
use crate::scrapers::ScrapeError;
use crate::store::{PriceStore, PropertyStore};

enum RunEnd {
    Completed,
    Cancelled,
    /// Another party (stale cleanup) took the search away from this worker
    Superseded,
}

/// Drive one admitted search to its end state
pub(super) async fn run(orchestrator: ExtractionOrchestrator, search: SearchRecord, cancel: CancellationToken) {
    let (hotel_id, search_id, attempt) = (search.hotel_id, search.id, search.attempt);

    let finish = match drive(&orchestrator, &search, &cancel).await {
        Ok(RunEnd::Completed) => {
            orchestrator
                .commit(hotel_id, search_id, attempt, |r, now| r.complete(now))
                .await
        }
        Ok(RunEnd::Cancelled) => {
            orchestrator
                .commit(hotel_id, search_id, attempt, |r, now| r.cancel(now))
                .await
        }
        Ok(RunEnd::Superseded) => Ok(None),
        Err(err) => {
            error!("Extraction {} failed: {}", search_id, err);
            let message = err.to_string();
            orchestrator
                .commit(hotel_id, search_id, attempt, |r, now| r.fail(message, now))
                .await
        }
    };

    match finish {
        Ok(Some(record)) => info!(
            "Extraction {} ended {} with {}/{} dates and {} prices",
            search_id, record.status, record.processed_dates, record.total_dates, record.total_prices_found
        ),
        Ok(None) => debug!("Extraction {} was superseded, leaving record untouched", search_id),
        Err(e) => error!("Could not record end of extraction {}: {}", search_id, e),
    }
}

async fn drive(
    orchestrator: &ExtractionOrchestrator,
    search: &SearchRecord,
    cancel: &CancellationToken,
) -> Result<RunEnd> {
    let inner = &orchestrator.inner;
    let property = inner
        .store
        .get_property(search.property_id)
        .await
        .map_err(|e| RateShopperError::Extraction(format!("property unavailable: {}", e)))?;
    let normalizer = PriceNormalizer::new(search.max_bundle_size);

    let dates = search.remaining_dates();
    info!(
        "Extracting {} of {} dates for {} via {}",
        dates.len(),
        search.total_dates,
        property.name,
        inner.scraper.source_name()
    );

    for date in dates {
        if cancel.is_cancelled() {
            return Ok(RunEnd::Cancelled);
        }

        let observations = match scrape_with_retry(orchestrator, &property, date, cancel).await {
            Ok(Some(observations)) => observations,
            Ok(None) => return Ok(RunEnd::Cancelled),
            Err(e) => {
                return Err(RateShopperError::Extraction(format!(
                    "{} on {}: {}",
                    property.name, date, e
                )))
            }
        };

        let accepted = accept(&normalizer, observations, &property, search, date);
        let found = u32::try_from(accepted.len()).unwrap_or(u32::MAX);
        if !accepted.is_empty() {
            inner.store.append_prices(accepted).await?;
        }

        let committed = orchestrator
            .commit(search.hotel_id, search.id, search.attempt, |r, now| r.record_date(found, now))
            .await?;
        match committed {
            Some(record) => debug!(
                "{}: {} prices, {}/{} dates",
                date, found, record.processed_dates, record.total_dates
            ),
            None => return Ok(RunEnd::Superseded),
        }
    }

    Ok(RunEnd::Completed)
}

/// Keep observations that belong to this date and pass the bundle limits
fn accept(
    normalizer: &PriceNormalizer,
    observations: Vec<PriceObservation>,
    property: &Property,
    search: &SearchRecord,
    date: NaiveDate,
) -> Vec<PriceObservation> {
    observations
        .into_iter()
        .filter_map(|mut observation| {
            if observation.property_id != property.id || observation.check_in != date {
                warn!(
                    "Dropping observation for {} on {}: expected {} on {}",
                    observation.property_id, observation.check_in, property.id, date
                );
                return None;
            }
            if let Err(e) = normalizer.normalize(&observation) {
                warn!("Dropping observation for {} on {}: {}", property.name, date, e);
                return None;
            }
            observation.search_id = Some(search.id);
            Some(observation)
        })
        .collect()
}

/// Scrape one date, retrying retryable failures with linear backoff.
/// `Ok(None)` means the run was cancelled while backing off.
async fn scrape_with_retry(
    orchestrator: &ExtractionOrchestrator,
    property: &Property,
    date: NaiveDate,
    cancel: &CancellationToken,
) -> std::result::Result<Option<Vec<PriceObservation>>, ScrapeError> {
    let config = &orchestrator.inner.config;
    let mut retries = 0;
    loop {
        match orchestrator.inner.scraper.scrape(property, date).await {
            Ok(observations) => return Ok(Some(observations)),
            Err(err) if err.is_retryable() && retries < config.max_retries => {
                retries += 1;
                let backoff = config.retry_backoff(retries);
                warn!(
                    "Scrape of {} on {} failed ({}), retry {}/{} in {:?}",
                    property.name, date, err, retries, config.max_retries, backoff
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(None),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
            Err(err) => return Err(err),
        }
    }
}
