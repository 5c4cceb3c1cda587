//! Request metrics and formatting helpers
//!
//! The server records one sample per handled command: its latency and
//! whether the response status was `ok`.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use log::{debug, warn};

use crate::transport::TransportStats;

/// Per-command latency and success counters
#[derive(Debug, Clone, Default)]
pub struct PerformanceMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_duration: Duration,
    pub min_duration: Option<Duration>,
    pub max_duration: Option<Duration>,
    pub avg_duration: Duration,
    /// Request count per published function code
    pub by_function: BTreeMap<i64, u64>,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one handled command
    pub fn record(&mut self, function_code: i64, duration: Duration, success: bool) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }
        *self.by_function.entry(function_code).or_insert(0) += 1;

        self.total_duration += duration;
        self.min_duration = Some(self.min_duration.map_or(duration, |min| min.min(duration)));
        self.max_duration = Some(self.max_duration.map_or(duration, |max| max.max(duration)));
        self.avg_duration = self.total_duration / self.total_requests as u32;
    }

    /// Success rate as percentage
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        (self.successful_requests as f64 / self.total_requests as f64) * 100.0
    }
}

/// Timer for measuring operation duration
pub struct OperationTimer {
    start: Instant,
    operation_name: String,
}

impl OperationTimer {
    pub fn start(operation_name: &str) -> Self {
        Self {
            start: Instant::now(),
            operation_name: operation_name.to_string(),
        }
    }

    /// Stop timer and log result
    pub fn stop_and_log(self, success: bool) -> Duration {
        let duration = self.start.elapsed();
        if success {
            debug!("{} succeeded in {}", self.operation_name, format::format_duration(duration));
        } else {
            warn!("{} failed after {}", self.operation_name, format::format_duration(duration));
        }
        duration
    }
}

/// Formatting and display utilities
pub mod format {
    use super::*;

    /// Format duration in a human-readable way
    pub fn format_duration(duration: Duration) -> String {
        let micros = duration.as_micros();
        if micros < 1000 {
            format!("{}us", micros)
        } else if micros < 1_000_000 {
            format!("{:.1}ms", micros as f64 / 1000.0)
        } else {
            format!("{:.2}s", duration.as_secs_f64())
        }
    }

    /// Format performance metrics as a table
    pub fn format_metrics(metrics: &PerformanceMetrics) -> String {
        let per_function = metrics
            .by_function
            .iter()
            .map(|(code, count)| format!("{}={}", code, count))
            .collect::<Vec<_>>()
            .join(" ");

        format!(
            "Request Metrics:\n\
             ├─ Total Requests: {}\n\
             ├─ Successful: {} ({:.1}%)\n\
             ├─ Failed: {}\n\
             ├─ Average Duration: {}\n\
             ├─ Min Duration: {}\n\
             ├─ Max Duration: {}\n\
             └─ By Function: {}",
            metrics.total_requests,
            metrics.successful_requests,
            metrics.success_rate(),
            metrics.failed_requests,
            format_duration(metrics.avg_duration),
            metrics.min_duration.map_or("N/A".to_string(), format_duration),
            metrics.max_duration.map_or("N/A".to_string(), format_duration),
            if per_function.is_empty() { "-".to_string() } else { per_function }
        )
    }

    /// One-line summary of a slave session's counters
    pub fn format_session_stats(endpoint: &str, stats: &TransportStats) -> String {
        format!(
            "{}: connects={} sent={} received={} errors={} timeouts={}",
            endpoint,
            stats.connects,
            stats.requests_sent,
            stats.responses_received,
            stats.errors,
            stats.timeouts
        )
    }
}
