use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{RateShopperError, Result};
use crate::models::Property;

/// Longest date range a single search may cover
pub const MAX_RANGE_MONTHS: u32 = 12;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SearchStatus {
    /// States that end a run. CANCELLED ends a run but can be resumed.
    pub fn ends_run(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(self, to: SearchStatus) -> bool {
        use SearchStatus::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Cancelled, Running)
                | (Failed, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for SearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Client request to schedule a price collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSearch {
    pub property_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Overrides the property's bundle limit for this search
    #[serde(default)]
    pub max_bundle_size: Option<u32>,
}

impl CreateSearch {
    pub fn validate(&self, today: NaiveDate) -> Result<()> {
        if self.start_date < today {
            return Err(RateShopperError::validation(format!(
                "start_date {} is in the past",
                self.start_date
            )));
        }
        if self.end_date <= self.start_date {
            return Err(RateShopperError::validation(format!(
                "end_date {} must be after start_date {}",
                self.end_date, self.start_date
            )));
        }
        let limit = self
            .start_date
            .checked_add_months(Months::new(MAX_RANGE_MONTHS))
            .ok_or_else(|| RateShopperError::validation("start_date out of range"))?;
        if self.end_date > limit {
            return Err(RateShopperError::validation(format!(
                "date range exceeds {} months",
                MAX_RANGE_MONTHS
            )));
        }
        if self.max_bundle_size == Some(0) {
            return Err(RateShopperError::validation("max_bundle_size must be at least 1"));
        }
        Ok(())
    }
}

/// The persisted unit of orchestration work
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchRecord {
    pub id: Uuid,
    pub property_id: Uuid,
    pub hotel_id: Uuid,
    pub property_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub max_bundle_size: u32,
    pub status: SearchStatus,
    pub total_dates: u32,
    pub processed_dates: u32,
    pub total_prices_found: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Last time the record changed; drives staleness detection
    pub updated_at: DateTime<Utc>,
    pub error_log: Option<String>,
    /// Incremented on every admission; fences writes from superseded workers
    pub attempt: u32,
    /// processed_dates when the current run was admitted
    #[serde(default)]
    pub processed_at_start: u32,
}

impl SearchRecord {
    /// Builds a PENDING record. The request must already be validated.
    pub fn new(property: &Property, request: &CreateSearch, now: DateTime<Utc>) -> Self {
        let total_dates = (request.end_date - request.start_date).num_days() + 1;
        Self {
            id: Uuid::new_v4(),
            property_id: property.id,
            hotel_id: property.hotel_id,
            property_name: property.name.clone(),
            start_date: request.start_date,
            end_date: request.end_date,
            max_bundle_size: request.max_bundle_size.unwrap_or(property.max_bundle_size),
            status: SearchStatus::Pending,
            total_dates: u32::try_from(total_dates).unwrap_or(0),
            processed_dates: 0,
            total_prices_found: 0,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            error_log: None,
            attempt: 0,
            processed_at_start: 0,
        }
    }

    /// Every date in the range, inclusive
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start_date
            .iter_days()
            .take_while(move |d| *d <= self.end_date)
    }

    /// Dates not yet processed in this run
    pub fn remaining_dates(&self) -> Vec<NaiveDate> {
        self.dates().skip(self.processed_dates as usize).collect()
    }

    fn transition(&mut self, to: SearchStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(RateShopperError::InvalidTransition { from: self.status, to });
        }
        self.status = to;
        Ok(())
    }

    /// Admit a run. CANCELLED resumes where it stopped; FAILED starts over.
    pub fn begin_run(&mut self, now: DateTime<Utc>) -> Result<()> {
        let from = self.status;
        self.transition(SearchStatus::Running)?;
        if from == SearchStatus::Failed {
            self.processed_dates = 0;
            self.total_prices_found = 0;
        }
        self.attempt += 1;
        self.processed_at_start = self.processed_dates;
        self.error_log = None;
        self.started_at = Some(now);
        self.completed_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// Count one processed date and the prices stored for it
    pub fn record_date(&mut self, prices_found: u32, now: DateTime<Utc>) -> Result<()> {
        if self.status != SearchStatus::Running {
            return Err(RateShopperError::InvalidTransition {
                from: self.status,
                to: SearchStatus::Running,
            });
        }
        if self.processed_dates >= self.total_dates {
            return Err(RateShopperError::Extraction(format!(
                "search {} already processed all {} dates",
                self.id, self.total_dates
            )));
        }
        self.processed_dates += 1;
        self.total_prices_found += prices_found;
        self.updated_at = now;
        Ok(())
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(SearchStatus::Completed)?;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.transition(SearchStatus::Failed)?;
        self.error_log = Some(error.into());
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(SearchStatus::Cancelled)?;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.processed_dates >= self.total_dates
    }

    /// RUNNING with no update for longer than `timeout`
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.status == SearchStatus::Running && now - self.updated_at > timeout
    }

    pub fn progress_percent(&self) -> f64 {
        if self.total_dates == 0 {
            return 0.0;
        }
        (f64::from(self.processed_dates) / f64::from(self.total_dates) * 1000.0).round() / 10.0
    }

    pub fn live_progress(&self, now: DateTime<Utc>) -> LiveProgress {
        let end = match self.status {
            SearchStatus::Running => now,
            _ => self.completed_at.unwrap_or(now),
        };
        let elapsed_seconds = self
            .started_at
            .map(|started| (end - started).num_seconds().max(0))
            .unwrap_or(0);

        let done_this_run = self.processed_dates.saturating_sub(self.processed_at_start);
        let eta_seconds = if self.status == SearchStatus::Running && done_this_run > 0 {
            let remaining = self.total_dates.saturating_sub(self.processed_dates);
            let per_date = elapsed_seconds as f64 / f64::from(done_this_run);
            Some((per_date * f64::from(remaining)).round() as i64)
        } else {
            None
        };

        LiveProgress {
            search_id: self.id,
            status: self.status,
            processed_dates: self.processed_dates,
            total_dates: self.total_dates,
            progress_percent: self.progress_percent(),
            total_prices_found: self.total_prices_found,
            elapsed_seconds,
            eta_seconds,
            error_log: self.error_log.clone(),
        }
    }
}

/// Point-in-time progress of one search
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LiveProgress {
    pub search_id: Uuid,
    pub status: SearchStatus,
    pub processed_dates: u32,
    pub total_dates: u32,
    pub progress_percent: f64,
    pub total_prices_found: u32,
    pub elapsed_seconds: i64,
    pub eta_seconds: Option<i64>,
    pub error_log: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, day).unwrap()
    }

    fn request(start: NaiveDate, end: NaiveDate) -> CreateSearch {
        CreateSearch {
            property_id: Uuid::new_v4(),
            start_date: start,
            end_date: end,
            max_bundle_size: None,
        }
    }

    fn record() -> SearchRecord {
        let property = Property::new(Uuid::new_v4(), "Hotel Azul", "https://example.com/azul", Utc::now())
            .with_max_bundle_size(3);
        SearchRecord::new(&property, &request(d(1), d(3)), Utc::now())
    }

    #[test]
    fn validate_rejects_bad_ranges() {
        let today = d(1);
        assert!(request(d(1), d(3)).validate(today).is_ok());

        let past = NaiveDate::from_ymd_opt(2025, 8, 31).unwrap();
        assert!(matches!(
            request(past, d(3)).validate(today),
            Err(RateShopperError::Validation(_))
        ));
        assert!(request(d(3), d(3)).validate(today).is_err());
        assert!(request(d(3), d(2)).validate(today).is_err());

        let in_a_year = NaiveDate::from_ymd_opt(2026, 9, 1).unwrap();
        assert!(request(d(1), in_a_year).validate(today).is_ok());
        let too_far = NaiveDate::from_ymd_opt(2026, 9, 2).unwrap();
        assert!(request(d(1), too_far).validate(today).is_err());

        let mut zero_bundle = request(d(1), d(3));
        zero_bundle.max_bundle_size = Some(0);
        assert!(zero_bundle.validate(today).is_err());
    }

    #[test]
    fn new_record_counts_dates_and_inherits_bundle_limit() {
        let record = record();
        assert_eq!(record.status, SearchStatus::Pending);
        assert_eq!(record.total_dates, 3);
        assert_eq!(record.max_bundle_size, 3);
        assert_eq!(record.dates().collect::<Vec<_>>(), vec![d(1), d(2), d(3)]);
    }

    #[test]
    fn cancelled_resume_keeps_progress() {
        let now = Utc::now();
        let mut record = record();
        record.begin_run(now).unwrap();
        record.record_date(2, now).unwrap();
        record.cancel(now).unwrap();

        record.begin_run(now).unwrap();
        assert_eq!(record.attempt, 2);
        assert_eq!(record.processed_dates, 1);
        assert_eq!(record.total_prices_found, 2);
        assert_eq!(record.remaining_dates(), vec![d(2), d(3)]);
    }

    #[test]
    fn failed_retry_starts_over() {
        let now = Utc::now();
        let mut record = record();
        record.begin_run(now).unwrap();
        record.record_date(1, now).unwrap();
        record.fail("boom", now).unwrap();
        assert_eq!(record.error_log.as_deref(), Some("boom"));

        record.begin_run(now).unwrap();
        assert_eq!(record.processed_dates, 0);
        assert_eq!(record.total_prices_found, 0);
        assert!(record.error_log.is_none());
        assert_eq!(record.remaining_dates().len(), 3);
    }

    #[test]
    fn completed_is_terminal() {
        let now = Utc::now();
        let mut record = record();
        record.begin_run(now).unwrap();
        for _ in 0..3 {
            record.record_date(1, now).unwrap();
        }
        assert!(record.record_date(1, now).is_err());
        record.complete(now).unwrap();

        assert_eq!(
            record.begin_run(now),
            Err(RateShopperError::InvalidTransition {
                from: SearchStatus::Completed,
                to: SearchStatus::Running,
            })
        );
        assert!(record.cancel(now).is_err());
    }

    #[test]
    fn live_progress_estimates_remaining_time() {
        let start = Utc::now();
        let mut record = record();
        record.begin_run(start).unwrap();
        record.record_date(1, start + Duration::seconds(10)).unwrap();

        let progress = record.live_progress(start + Duration::seconds(10));
        assert_eq!(progress.processed_dates, 1);
        assert_eq!(progress.progress_percent, 33.3);
        assert_eq!(progress.elapsed_seconds, 10);
        assert_eq!(progress.eta_seconds, Some(20));
    }

    #[test]
    fn staleness_only_applies_to_running() {
        let start = Utc::now();
        let mut record = record();
        let later = start + Duration::minutes(30);
        assert!(!record.is_stale(later, Duration::minutes(10)));

        record.begin_run(start).unwrap();
        assert!(record.is_stale(later, Duration::minutes(10)));
        assert!(!record.is_stale(start + Duration::minutes(5), Duration::minutes(10)));
    }
}
