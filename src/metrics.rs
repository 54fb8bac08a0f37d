//! Process counters and Prometheus-style text exposition.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::results::AnalysisStatus;

/// Fixed dispatch latency bucket upper bounds in ms.
const LATENCY_BUCKETS_MS: [u64; 12] = [10, 25, 50, 100, 250, 500, 1000, 2500, 5000, 10000, 30000, 60000];

pub struct RelayMetrics {
    pub ingests_total: AtomicU64,
    pub records_total: AtomicU64,
    pub acknowledged_total: AtomicU64,
    pub decode_errors_total: AtomicU64,
    pub analyses_success_total: AtomicU64,
    pub analyses_error_total: AtomicU64,
    pub dispatch_retries_total: AtomicU64,
    hist_counts: Vec<AtomicU64>,
    hist_sum_ms: AtomicU64,
    hist_count: AtomicU64,
    process_start_epoch: f64,
    process_start_instant: Instant,
}

/// Point-in-time gauges supplied by the caller at render time.
pub struct Gauges {
    pub buffer_records: usize,
    pub buffer_capacity: usize,
    pub results: usize,
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayMetrics {
    pub fn new() -> Self {
        let start_time = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            ingests_total: AtomicU64::new(0),
            records_total: AtomicU64::new(0),
            acknowledged_total: AtomicU64::new(0),
            decode_errors_total: AtomicU64::new(0),
            analyses_success_total: AtomicU64::new(0),
            analyses_error_total: AtomicU64::new(0),
            dispatch_retries_total: AtomicU64::new(0),
            hist_counts: LATENCY_BUCKETS_MS.iter().map(|_| AtomicU64::new(0)).collect(),
            hist_sum_ms: AtomicU64::new(0),
            hist_count: AtomicU64::new(0),
            process_start_epoch: start_time.as_secs_f64(),
            process_start_instant: Instant::now(),
        }
    }

    pub fn record_ingest(&self, records: usize) {
        self.ingests_total.fetch_add(1, Ordering::Relaxed);
        self.records_total.fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn record_acknowledged(&self) {
        self.ingests_total.fetch_add(1, Ordering::Relaxed);
        self.acknowledged_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self, status: AnalysisStatus, attempts: u32, elapsed_ms: u64) {
        match status {
            AnalysisStatus::Success => {
                self.analyses_success_total.fetch_add(1, Ordering::Relaxed);
            }
            AnalysisStatus::Error => {
                self.analyses_error_total.fetch_add(1, Ordering::Relaxed);
            }
            AnalysisStatus::Processing => {}
        }
        if attempts > 1 {
            self.dispatch_retries_total
                .fetch_add(u64::from(attempts - 1), Ordering::Relaxed);
        }
        self.hist_sum_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
        self.hist_count.fetch_add(1, Ordering::Relaxed);
        // find first bucket >= value
        for (idx, ub) in LATENCY_BUCKETS_MS.iter().enumerate() {
            if elapsed_ms <= *ub {
                self.hist_counts[idx].fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
    }

    pub fn render(&self, gauges: &Gauges) -> String {
        let mut buf = String::new();
        counter(
            &mut buf,
            "relay_ingests_total",
            "Ingest requests that normalized successfully",
            self.ingests_total.load(Ordering::Relaxed),
        );
        counter(
            &mut buf,
            "relay_records_total",
            "Records appended to the context buffer",
            self.records_total.load(Ordering::Relaxed),
        );
        counter(
            &mut buf,
            "relay_acknowledged_total",
            "Ingests acknowledged with nothing to analyze",
            self.acknowledged_total.load(Ordering::Relaxed),
        );
        counter(
            &mut buf,
            "relay_decode_errors_total",
            "Ingests rejected because the body could not be decoded",
            self.decode_errors_total.load(Ordering::Relaxed),
        );
        writeln!(
            &mut buf,
            "# HELP relay_analyses_total Completed analyses by final status\n# TYPE relay_analyses_total counter"
        )
        .ok();
        writeln!(
            &mut buf,
            "relay_analyses_total{{status=\"success\"}} {}",
            self.analyses_success_total.load(Ordering::Relaxed)
        )
        .ok();
        writeln!(
            &mut buf,
            "relay_analyses_total{{status=\"error\"}} {}",
            self.analyses_error_total.load(Ordering::Relaxed)
        )
        .ok();
        counter(
            &mut buf,
            "relay_dispatch_retries_total",
            "Extra dispatch attempts made by the retry policy",
            self.dispatch_retries_total.load(Ordering::Relaxed),
        );

        writeln!(
            &mut buf,
            "# HELP relay_dispatch_latency_ms Dispatch latency histogram milliseconds\n# TYPE relay_dispatch_latency_ms histogram"
        )
        .ok();
        let mut cumulative: u64 = 0;
        for (i, ub) in LATENCY_BUCKETS_MS.iter().enumerate() {
            cumulative += self.hist_counts[i].load(Ordering::Relaxed);
            writeln!(
                &mut buf,
                "relay_dispatch_latency_ms_bucket{{le=\"{}\"}} {}",
                ub, cumulative
            )
            .ok();
        }
        let count = self.hist_count.load(Ordering::Relaxed);
        writeln!(
            &mut buf,
            "relay_dispatch_latency_ms_bucket{{le=\"+Inf\"}} {}",
            count
        )
        .ok();
        writeln!(
            &mut buf,
            "relay_dispatch_latency_ms_sum {}",
            self.hist_sum_ms.load(Ordering::Relaxed)
        )
        .ok();
        writeln!(&mut buf, "relay_dispatch_latency_ms_count {}", count).ok();

        gauge(
            &mut buf,
            "relay_buffer_records",
            "Records currently held in the context buffer",
            gauges.buffer_records as f64,
        );
        gauge(
            &mut buf,
            "relay_buffer_capacity",
            "Configured context buffer capacity",
            gauges.buffer_capacity as f64,
        );
        gauge(
            &mut buf,
            "relay_results",
            "Analysis records currently stored",
            gauges.results as f64,
        );
        writeln!(
            &mut buf,
            "# HELP relay_build_info Build information\n# TYPE relay_build_info gauge"
        )
        .ok();
        writeln!(
            &mut buf,
            "relay_build_info{{version=\"{}\"}} 1",
            env!("CARGO_PKG_VERSION")
        )
        .ok();
        gauge(
            &mut buf,
            "relay_process_start_time_seconds",
            "Process start time (Unix epoch seconds)",
            self.process_start_epoch,
        );
        gauge(
            &mut buf,
            "relay_process_uptime_seconds",
            "Process uptime seconds",
            self.process_start_instant.elapsed().as_secs_f64(),
        );
        buf
    }
}

fn counter(buf: &mut String, name: &str, help: &str, value: u64) {
    writeln!(buf, "# HELP {} {}\n# TYPE {} counter", name, help, name).ok();
    writeln!(buf, "{} {}", name, value).ok();
}

fn gauge(buf: &mut String, name: &str, help: &str, value: f64) {
    writeln!(buf, "# HELP {} {}\n# TYPE {} gauge", name, help, name).ok();
    writeln!(buf, "{} {}", name, value).ok();
}
