//! Client-held collection of the latest reading per patient
//!
//! Snapshots replace the whole collection; stream updates are merged by
//! patient id, keeping the first-seen order of patients stable.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::reading::PatientReading;

/// Where an incremental update landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Inserted(usize),
    Replaced(usize),
}

/// Ordered collection of current patient readings
#[derive(Debug, Default)]
pub struct ReadingStore {
    readings: Vec<PatientReading>,
}

impl ReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held collection with a full snapshot, as-is
    pub fn apply_snapshot(&mut self, readings: Vec<PatientReading>) {
        if let Some(duplicate) = first_duplicate(&readings) {
            tracing::warn!(
                "Snapshot contains more than one reading for patient '{}'",
                duplicate
            );
        }
        self.readings = readings;
    }

    /// Merge one reading: replace in place if the patient is known, append otherwise
    pub fn apply_update(&mut self, reading: PatientReading) -> UpdateOutcome {
        match self
            .readings
            .iter()
            .position(|r| r.patient_id == reading.patient_id)
        {
            Some(index) => {
                self.readings[index] = reading;
                UpdateOutcome::Replaced(index)
            }
            None => {
                self.readings.push(reading);
                UpdateOutcome::Inserted(self.readings.len() - 1)
            }
        }
    }

    pub fn readings(&self) -> &[PatientReading] {
        &self.readings
    }

    pub fn get(&self, patient_id: &str) -> Option<&PatientReading> {
        self.readings.iter().find(|r| r.patient_id == patient_id)
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn alert_count(&self) -> usize {
        self.readings.iter().filter(|r| r.is_alert()).count()
    }
}

fn first_duplicate(readings: &[PatientReading]) -> Option<&str> {
    let mut seen = HashSet::with_capacity(readings.len());
    readings
        .iter()
        .map(|r| r.patient_id.as_str())
        .find(|id| !seen.insert(*id))
}

/// Shared store handle used by the stream task, the poller and the dashboard
pub type StoreHandle = Arc<RwLock<ReadingStore>>;

pub fn new_store_handle() -> StoreHandle {
    Arc::new(RwLock::new(ReadingStore::new()))
}
