//! Process-wide conversion counters.
//!
//! [`StatsRecorder`] is owned by the service and shared with the dispatcher.
//! All counters live behind one `Mutex` so every snapshot is consistent:
//! `total_conversions == successful_conversions + failed_conversions` holds for
//! any snapshot, even while conversions are running. In-flight attempts are
//! reported separately in `in_flight` until their outcome is recorded.

use crate::category::FileCategory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Attempts and successes for one key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub count: u64,
    pub success: u64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionStats {
    pub total_conversions: u64,
    pub successful_conversions: u64,
    pub failed_conversions: u64,
    pub in_flight: u64,
    pub total_size_processed: u64,
    pub conversion_types: BTreeMap<String, Tally>,
    pub file_types: BTreeMap<FileCategory, Tally>,
}

/// Human-facing summary served by the statistics endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub total_conversions: u64,
    pub successful_conversions: u64,
    pub failed_conversions: u64,
    pub in_flight: u64,
    pub success_rate: String,
    pub total_size_processed: String,
    pub most_popular_conversion: String,
    pub most_processed_file_type: String,
}

/// Thread-safe recorder of conversion outcomes.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    inner: Mutex<ConversionStats>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an attempt for `conversion_type` on a `category` input of
    /// `input_bytes`.
    pub fn record_start(&self, category: FileCategory, conversion_type: &str, input_bytes: u64) {
        let mut s = self.lock();
        s.in_flight += 1;
        s.total_size_processed = s.total_size_processed.saturating_add(input_bytes);
        s.conversion_types
            .entry(conversion_type.to_string())
            .or_default()
            .count += 1;
        s.file_types.entry(category).or_default().count += 1;
    }

    /// Settle one in-flight attempt as a success.
    pub fn record_success(&self, category: FileCategory, conversion_type: &str) {
        let mut s = self.lock();
        s.in_flight = s.in_flight.saturating_sub(1);
        s.total_conversions += 1;
        s.successful_conversions += 1;
        s.conversion_types
            .entry(conversion_type.to_string())
            .or_default()
            .success += 1;
        s.file_types.entry(category).or_default().success += 1;
    }

    /// Settle one in-flight attempt as a failure.
    pub fn record_failure(&self) {
        let mut s = self.lock();
        s.in_flight = s.in_flight.saturating_sub(1);
        s.total_conversions += 1;
        s.failed_conversions += 1;
    }

    pub fn snapshot(&self) -> ConversionStats {
        self.lock().clone()
    }

    pub fn summary(&self) -> StatsSummary {
        let s = self.snapshot();
        let success_rate = if s.total_conversions == 0 {
            0.0
        } else {
            s.successful_conversions as f64 / s.total_conversions as f64 * 100.0
        };
        StatsSummary {
            total_conversions: s.total_conversions,
            successful_conversions: s.successful_conversions,
            failed_conversions: s.failed_conversions,
            in_flight: s.in_flight,
            success_rate: format!("{success_rate:.1}%"),
            total_size_processed: format_file_size(s.total_size_processed),
            most_popular_conversion: most_counted(s.conversion_types.iter())
                .unwrap_or_else(|| "None".to_string()),
            most_processed_file_type: most_counted(
                s.file_types.iter().map(|(k, v)| (k.as_str(), v)),
            )
            .unwrap_or_else(|| "None".to_string()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConversionStats> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Key with the highest attempt count; ties go to the alphabetically first key.
fn most_counted<'a, K>(entries: impl Iterator<Item = (K, &'a Tally)>) -> Option<String>
where
    K: AsRef<str>,
{
    entries
        .max_by(|(ka, a), (kb, b)| {
            a.count
                .cmp(&b.count)
                .then_with(|| kb.as_ref().cmp(ka.as_ref()))
        })
        .map(|(k, _)| k.as_ref().to_string())
}

/// Format a byte count with one decimal: `1.5 MB`.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}
