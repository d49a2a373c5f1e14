//! Purpose: Own the process-wide inspector state behind one cloneable handle.
//! Exports: `Inspector`, `display_time`.
//! Role: Shared by the interceptor (writes) and the HTTP surface (reads, select, clear).
//! Invariants: Id assignment and append happen in one critical section; no await inside.
//! Invariants: Payloads are decoded before the lock is taken; the lock never covers inflation.
//! Invariants: Only `record_payload*` and `clear` mutate the store.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use time::OffsetDateTime;
use time::macros::format_description;

use crate::core::decode::{Capture, DEFAULT_MAX_INFLATED_BYTES, RecordOutcome};
use crate::core::error::{Error, ErrorKind};
use crate::core::status::{
    self, OUTPUT_NO_BODY, OUTPUT_PLACEHOLDER, STATUS_DECODE_FAILED, STATUS_NO_BODY, STATUS_READY,
    StatusView, WebsiteActions,
};
use crate::core::store::{DecodedRequest, RequestStore};

#[derive(Clone, Debug)]
pub struct Inspector {
    inner: Arc<Mutex<InspectorState>>,
    max_inflated_bytes: u64,
}

impl Default for Inspector {
    fn default() -> Self {
        Self {
            inner: Arc::default(),
            max_inflated_bytes: DEFAULT_MAX_INFLATED_BYTES,
        }
    }
}

#[derive(Debug)]
struct InspectorState {
    store: RequestStore,
    status: String,
    output: String,
    website_actions: WebsiteActions,
    active: Option<u64>,
}

impl Default for InspectorState {
    fn default() -> Self {
        Self {
            store: RequestStore::new(),
            status: STATUS_READY.to_string(),
            output: OUTPUT_PLACEHOLDER.to_string(),
            website_actions: WebsiteActions::Unknown,
            active: None,
        }
    }
}

impl InspectorState {
    fn show(&mut self, id: u64) -> Option<DecodedRequest> {
        let entry = self.store.get(id)?.clone();
        self.active = Some(entry.id);
        self.output = entry.formatted.clone();
        self.status = status::showing_status(entry.id, &entry.timestamp);
        Some(entry)
    }
}

impl Inspector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps how far one payload may inflate; larger payloads are stored as inflate failures.
    pub fn with_max_inflated_bytes(mut self, max_inflated_bytes: u64) -> Self {
        self.max_inflated_bytes = max_inflated_bytes;
        self
    }

    fn lock(&self) -> MutexGuard<'_, InspectorState> {
        // The state is append-only, so a panicked holder cannot leave it torn.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_payload(&self, payload: &str) -> RecordOutcome {
        let timestamp = display_time(OffsetDateTime::now_utc()).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "failed to format capture time");
            String::new()
        });
        self.record_payload_at(payload, timestamp)
    }

    /// Decodes and stores one payload, then selects it, as the inspector does for every capture.
    pub fn record_payload_at(&self, payload: &str, timestamp: String) -> RecordOutcome {
        let capture = Capture::from_payload(payload, self.max_inflated_bytes);
        let outcome = {
            let mut state = self.lock();
            let outcome = capture.append_to(&mut state.store, timestamp);
            state.show(outcome.id);
            if outcome.is_ok() {
                state.website_actions = WebsiteActions::Enabled;
                state.status = status::captured_status(outcome.id, &outcome.timestamp);
            } else {
                state.status = STATUS_DECODE_FAILED.to_string();
            }
            outcome
        };
        match &outcome.error {
            None => tracing::info!(id = outcome.id, "captured website actions request"),
            Some(err) => {
                tracing::warn!(id = outcome.id, stage = %err.stage, error = %err, "failed to decode request")
            }
        }
        outcome
    }

    pub fn note_no_body(&self) {
        let mut state = self.lock();
        state.output = OUTPUT_NO_BODY.to_string();
        state.status = STATUS_NO_BODY.to_string();
    }

    /// Status text sink.
    pub fn set_status(&self, message: impl Into<String>) {
        self.lock().status = message.into();
    }

    pub fn list(&self) -> Vec<DecodedRequest> {
        self.lock().store.list().to_vec()
    }

    pub fn get(&self, id: u64) -> Option<DecodedRequest> {
        self.lock().store.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().store.is_empty()
    }

    pub fn select(&self, id: u64) -> Result<DecodedRequest, Error> {
        self.lock().show(id).ok_or_else(|| {
            Error::new(ErrorKind::NotFound)
                .with_message("request not found")
                .with_id(id)
        })
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.store.clear();
        state.active = None;
        state.output = OUTPUT_PLACEHOLDER.to_string();
        state.status = STATUS_READY.to_string();
    }

    /// Marks Website Actions disabled when nothing has been captured by the time the tag settles.
    pub fn check_website_actions(&self) -> WebsiteActions {
        let mut state = self.lock();
        if state.store.is_empty() {
            state.website_actions = WebsiteActions::Disabled;
        }
        state.website_actions
    }

    pub fn status(&self) -> StatusView {
        let state = self.lock();
        StatusView {
            status: state.status.clone(),
            output: state.output.clone(),
            website_actions: state.website_actions,
            active: state.active,
            count: state.store.len(),
        }
    }
}

/// Wall-clock display time for entries, `HH:MM:SS`.
pub fn display_time(now: OffsetDateTime) -> Result<String, Error> {
    let format = format_description!("[hour]:[minute]:[second]");
    now.format(&format).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("timestamp format failed")
            .with_source(err)
    })
}
