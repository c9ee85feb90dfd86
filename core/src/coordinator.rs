use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use chrono::{Local, NaiveDate, TimeZone, Utc};
use futures::future::{AbortHandle, Abortable};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{AnalysisResult, FoodRecord};
use crate::store::FoodRecordStore;
use crate::vision::{AnalysisError, FoodAnalyzer};

/// How long an error message stays visible before it is cleared.
pub const ERROR_DISPLAY_DURATION: Duration = Duration::from_secs(3);

pub const MSG_INVALID_IMAGE: &str = "The image could not be processed. Please retake the photo.";
pub const MSG_INVALID_RESPONSE: &str = "There was a problem communicating with the server.";
pub const MSG_PARSING: &str = "Could not understand the server response.";
pub const MSG_NETWORK: &str = "Network error. Please check your connection.";

/// What a UI needs to render: the loading flag, the current error, and the records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub loading: bool,
    pub error_message: Option<String>,
    pub records: Vec<FoodRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Logged(FoodRecord),
    /// Carries the message that was shown to the user.
    Failed(String),
    Cancelled,
}

#[must_use]
pub fn user_message(err: &AnalysisError) -> &'static str {
    match err {
        AnalysisError::InvalidImageData => MSG_INVALID_IMAGE,
        AnalysisError::InvalidResponse { .. } => MSG_INVALID_RESPONSE,
        AnalysisError::ParsingError(_) => MSG_PARSING,
        AnalysisError::NetworkError(_) => MSG_NETWORK,
    }
}

struct Shared {
    state: watch::Sender<Snapshot>,
    // Bumped under the state lock whenever the error message is replaced or
    // cleared. An expiry timer only clears the message it was scheduled for.
    error_generation: AtomicU64,
}

/// Runs "analyze, then persist" for one image at a time and publishes the
/// resulting status through a [`Snapshot`].
///
/// Analysis failures never escape: each one becomes a short-lived message in
/// the snapshot. `submit_image` is not meant to be called concurrently with
/// itself.
pub struct FoodLogCoordinator {
    analyzer: Arc<dyn FoodAnalyzer>,
    store: Arc<dyn FoodRecordStore>,
    shared: Arc<Shared>,
    error_expiry: Mutex<Option<JoinHandle<()>>>,
    in_flight: Mutex<Option<AbortHandle>>,
    error_display: Duration,
}

impl FoodLogCoordinator {
    /// Create a coordinator and load the current collection from `store`.
    pub fn new(analyzer: Arc<dyn FoodAnalyzer>, store: Arc<dyn FoodRecordStore>) -> Result<Self> {
        let records = store.all()?;
        let (state, _) = watch::channel(Snapshot {
            records,
            ..Snapshot::default()
        });
        Ok(Self {
            analyzer,
            store,
            shared: Arc::new(Shared {
                state,
                error_generation: AtomicU64::new(0),
            }),
            error_expiry: Mutex::new(None),
            in_flight: Mutex::new(None),
            error_display: ERROR_DISPLAY_DURATION,
        })
    }

    #[must_use]
    pub fn with_error_display_duration(mut self, duration: Duration) -> Self {
        self.error_display = duration;
        self
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.shared.state.borrow().clone()
    }

    /// Receiver that is notified on every status or collection change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.shared.state.subscribe()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.shared.state.borrow().loading
    }

    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.shared.state.borrow().error_message.clone()
    }

    /// Analyze `image` and log the result as a new record.
    ///
    /// Must be called from within a Tokio runtime; failures schedule an
    /// expiry timer on it.
    pub async fn submit_image(&self, image: Vec<u8>) -> SubmitOutcome {
        self.abort_error_expiry();
        self.shared.state.send_modify(|s| {
            s.loading = true;
            self.shared.error_generation.fetch_add(1, Ordering::SeqCst);
            s.error_message = None;
        });
        let _guard = SubmissionGuard { coordinator: self };
        debug!(bytes = image.len(), "submitting image");

        let (handle, registration) = AbortHandle::new_pair();
        *lock(&self.in_flight) = Some(handle);
        let analysis = Abortable::new(self.analyzer.analyze(&image), registration).await;
        lock(&self.in_flight).take();

        let outcome = match analysis {
            Err(_aborted) => {
                info!("food analysis cancelled");
                SubmitOutcome::Cancelled
            }
            Ok(Err(err)) => {
                warn!(error = %err, "food analysis failed");
                let message = user_message(&err).to_string();
                self.show_error(message.clone());
                SubmitOutcome::Failed(message)
            }
            Ok(Ok(result)) => self.persist(result, image),
        };

        outcome
    }

    /// Abort the analysis currently in flight, if any.
    pub fn cancel_analysis(&self) -> bool {
        match lock(&self.in_flight).take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Show `message` now and clear it after the display duration, unless a
    /// newer error or a new submission replaces it first.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn show_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.abort_error_expiry();

        let mut generation = 0;
        self.shared.state.send_modify(|s| {
            generation = self.shared.error_generation.fetch_add(1, Ordering::SeqCst) + 1;
            s.error_message = Some(message);
        });

        let shared = Arc::clone(&self.shared);
        let delay = self.error_display;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.state.send_if_modified(|s| {
                if shared.error_generation.load(Ordering::SeqCst) != generation {
                    return false;
                }
                s.error_message = None;
                true
            });
        });
        *lock(&self.error_expiry) = Some(handle);
    }

    /// Write the editable fields of `record` over the stored record with the same id.
    pub fn update_record(&self, record: &FoodRecord) -> Result<bool> {
        let mut record = record.clone();
        let notes = record.notes.take();
        record.set_notes(notes);

        let found = self.store.update(&record)?;
        if found {
            info!(record_id = %record.id, "food record updated");
            self.refresh_records();
        } else {
            warn!(record_id = %record.id, "update for unknown food record");
        }
        Ok(found)
    }

    pub fn delete_record(&self, record: &FoodRecord) -> Result<bool> {
        self.delete_by_id(record.id)
    }

    /// Deleting an id that is already gone is not an error; it returns `false`.
    pub fn delete_by_id(&self, id: Uuid) -> Result<bool> {
        let deleted = self.store.delete(id)?;
        if deleted {
            info!(record_id = %id, "food record deleted");
            self.refresh_records();
        }
        Ok(deleted)
    }

    #[must_use]
    pub fn find_record(&self, id: Uuid) -> Option<FoodRecord> {
        self.shared
            .state
            .borrow()
            .records
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    /// Records captured on `date` in the local time zone, in store order.
    #[must_use]
    pub fn records_for_date(&self, date: NaiveDate) -> Vec<FoodRecord> {
        self.records_for_date_in(date, &Local)
    }

    #[must_use]
    pub fn records_for_date_in<Tz: TimeZone>(&self, date: NaiveDate, tz: &Tz) -> Vec<FoodRecord> {
        self.shared
            .state
            .borrow()
            .records
            .iter()
            .filter(|r| r.captured_on(date, tz))
            .cloned()
            .collect()
    }

    fn persist(&self, result: AnalysisResult, image: Vec<u8>) -> SubmitOutcome {
        let record = FoodRecord::from_analysis(result, image, Utc::now());
        match self.store.create(&record) {
            Ok(()) => {
                info!(
                    record_id = %record.id,
                    name = %record.name,
                    calories = record.calories,
                    "food record logged"
                );
                self.refresh_records();
                SubmitOutcome::Logged(record)
            }
            Err(e) => {
                warn!(error = %e, "failed to save food record");
                let message = e.to_string();
                self.show_error(message.clone());
                SubmitOutcome::Failed(message)
            }
        }
    }

    fn refresh_records(&self) {
        match self.store.all() {
            Ok(records) => self.shared.state.send_modify(|s| s.records = records),
            Err(e) => warn!(error = %e, "failed to reload food records"),
        }
    }

    fn abort_error_expiry(&self) {
        if let Some(handle) = lock(&self.error_expiry).take() {
            handle.abort();
        }
    }
}

impl Drop for FoodLogCoordinator {
    fn drop(&mut self) {
        self.abort_error_expiry();
        self.cancel_analysis();
    }
}

/// Resets `loading` and forgets the in-flight handle however a submission
/// ends, including when its future is dropped before completion.
struct SubmissionGuard<'a> {
    coordinator: &'a FoodLogCoordinator,
}

impl Drop for SubmissionGuard<'_> {
    fn drop(&mut self) {
        lock(&self.coordinator.in_flight).take();
        self.coordinator
            .shared
            .state
            .send_modify(|s| s.loading = false);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
