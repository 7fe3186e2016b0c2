//! A hand-rolled Prometheus text-exposition surface. Counters are bare
//! `AtomicU64`s; the one histogram (deployment duration) is a fixed-bucket
//! counter array, the cheapest thing that still produces valid exposition
//! output. No metrics crate is pulled in: this is the one ambient concern
//! SPEC_FULL deliberately keeps stdlib-only, since none of the teacher's
//! PaaS-control-plane crates reach for one either.

use std::sync::atomic::{AtomicU64, Ordering};

const DURATION_BUCKETS_SECS: &[f64] = &[5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, f64::INFINITY];

pub struct Metrics {
    http_requests_total: [AtomicU64; 5],
    jobs_processed_total: [AtomicU64; 2],
    deployments_total: [AtomicU64; 9],
    deployment_duration_buckets: [AtomicU64; DURATION_BUCKETS_SECS.len()],
    deployment_duration_sum: AtomicU64,
    deployment_duration_count: AtomicU64,
}

const HTTP_STATUS_LABELS: &[&str] = &["2xx", "3xx", "4xx", "5xx", "other"];
const JOB_RESULT_LABELS: &[&str] = &["success", "failure"];
const DEPLOYMENT_STATE_LABELS: &[&str] = &[
    "queued", "building", "publishing", "provisioning", "starting", "verifying", "success", "failed", "cancelled",
];

impl Default for Metrics {
    fn default() -> Self {
        Self {
            http_requests_total: Default::default(),
            jobs_processed_total: Default::default(),
            deployments_total: Default::default(),
            deployment_duration_buckets: Default::default(),
            deployment_duration_sum: AtomicU64::new(0),
            deployment_duration_count: AtomicU64::new(0),
        }
    }
}

impl Metrics {
    pub fn record_http_request(&self, status: u16) {
        let idx = match status {
            200..=299 => 0,
            300..=399 => 1,
            400..=499 => 2,
            500..=599 => 3,
            _ => 4,
        };
        self.http_requests_total[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_result(&self, success: bool) {
        self.jobs_processed_total[if success { 0 } else { 1 }].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deployment_state(&self, idx: usize) {
        if let Some(counter) = self.deployments_total.get(idx) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_deployment_duration(&self, secs: f64) {
        for (i, bucket) in DURATION_BUCKETS_SECS.iter().enumerate() {
            if secs <= *bucket {
                self.deployment_duration_buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.deployment_duration_sum.fetch_add(secs as u64, Ordering::Relaxed);
        self.deployment_duration_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Renders the Prometheus text exposition format (0.0.4) for `GET /metrics`.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP http_requests_total Total HTTP requests by status class.\n");
        out.push_str("# TYPE http_requests_total counter\n");
        for (label, counter) in HTTP_STATUS_LABELS.iter().zip(&self.http_requests_total) {
            out.push_str(&format!(
                "http_requests_total{{status=\"{label}\"}} {}\n",
                counter.load(Ordering::Relaxed)
            ));
        }

        out.push_str("# HELP jobs_processed_total Total jobs processed by result.\n");
        out.push_str("# TYPE jobs_processed_total counter\n");
        for (label, counter) in JOB_RESULT_LABELS.iter().zip(&self.jobs_processed_total) {
            out.push_str(&format!(
                "jobs_processed_total{{result=\"{label}\"}} {}\n",
                counter.load(Ordering::Relaxed)
            ));
        }

        out.push_str("# HELP deployments_total Total deployments by terminal/transition state.\n");
        out.push_str("# TYPE deployments_total counter\n");
        for (label, counter) in DEPLOYMENT_STATE_LABELS.iter().zip(&self.deployments_total) {
            out.push_str(&format!(
                "deployments_total{{state=\"{label}\"}} {}\n",
                counter.load(Ordering::Relaxed)
            ));
        }

        out.push_str("# HELP deployment_duration_seconds Time from queued to a terminal state.\n");
        out.push_str("# TYPE deployment_duration_seconds histogram\n");
        let mut cumulative = 0u64;
        for (bucket, counter) in DURATION_BUCKETS_SECS.iter().zip(&self.deployment_duration_buckets) {
            cumulative += counter.load(Ordering::Relaxed);
            let label = if bucket.is_infinite() { "+Inf".to_string() } else { bucket.to_string() };
            out.push_str(&format!("deployment_duration_seconds_bucket{{le=\"{label}\"}} {cumulative}\n"));
        }
        out.push_str(&format!(
            "deployment_duration_seconds_sum {}\n",
            self.deployment_duration_sum.load(Ordering::Relaxed)
        ));
        out.push_str(&format!(
            "deployment_duration_seconds_count {}\n",
            self.deployment_duration_count.load(Ordering::Relaxed)
        ));

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_contains_recorded_samples() {
        let metrics = Metrics::default();
        metrics.record_http_request(200);
        metrics.record_http_request(404);
        metrics.record_job_result(true);
        metrics.record_deployment_duration(42.0);

        let rendered = metrics.render();
        assert!(rendered.contains("http_requests_total{status=\"2xx\"} 1"));
        assert!(rendered.contains("http_requests_total{status=\"4xx\"} 1"));
        assert!(rendered.contains("jobs_processed_total{result=\"success\"} 1"));
        assert!(rendered.contains("deployment_duration_seconds_count 1"));
    }
}
