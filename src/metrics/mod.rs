use hyper::StatusCode;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// 请求计数器，由 AppContext 持有
#[derive(Debug, Default)]
pub struct Metrics {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    client_errors: AtomicU64,
    server_errors: AtomicU64,
    latency_micros_total: AtomicU64,
    in_flight: AtomicI64,
}

/// 某一时刻的计数快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub total: u64,
    pub successful: u64,
    pub client_errors: u64,
    pub server_errors: u64,
    pub in_flight: i64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求开始处理；返回的 guard 被丢弃时 in_flight 减一
    pub fn request_started(&self) -> InFlightGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard { metrics: self }
    }

    fn record(&self, status: StatusCode, elapsed: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.latency_micros_total
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);

        if status.is_server_error() {
            self.server_errors.fetch_add(1, Ordering::Relaxed);
        } else if status.is_client_error() {
            self.client_errors.fetch_add(1, Ordering::Relaxed);
        } else {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total: self.total_requests.load(Ordering::Relaxed),
            successful: self.successful_requests.load(Ordering::Relaxed),
            client_errors: self.client_errors.load(Ordering::Relaxed),
            server_errors: self.server_errors.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }

    /// 导出 Prometheus 格式
    pub fn export_prometheus(&self) -> String {
        let snap = self.snapshot();
        let latency_secs =
            self.latency_micros_total.load(Ordering::Relaxed) as f64 / 1_000_000.0;

        format!(
            "# HELP relaygate_requests_total Total number of completed requests\n\
             # TYPE relaygate_requests_total counter\n\
             relaygate_requests_total {}\n\
             # HELP relaygate_requests_successful Requests answered with a non-error status\n\
             # TYPE relaygate_requests_successful counter\n\
             relaygate_requests_successful {}\n\
             # HELP relaygate_requests_failed Failed requests by status class\n\
             # TYPE relaygate_requests_failed counter\n\
             relaygate_requests_failed{{class=\"4xx\"}} {}\n\
             relaygate_requests_failed{{class=\"5xx\"}} {}\n\
             # HELP relaygate_request_duration_seconds_sum Total time spent handling requests\n\
             # TYPE relaygate_request_duration_seconds_sum counter\n\
             relaygate_request_duration_seconds_sum {:.6}\n\
             # HELP relaygate_requests_in_flight Requests currently being handled\n\
             # TYPE relaygate_requests_in_flight gauge\n\
             relaygate_requests_in_flight {}\n",
            snap.total,
            snap.successful,
            snap.client_errors,
            snap.server_errors,
            latency_secs,
            snap.in_flight,
        )
    }
}

/// 一次正在处理的请求；连接中断导致 future 被丢弃时同样会归还 in_flight
#[must_use]
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    metrics: &'a Metrics,
}

impl InFlightGuard<'_> {
    /// 按响应状态码记录一次完成的请求
    pub fn finish(self, status: StatusCode, elapsed: Duration) {
        self.metrics.record(status, elapsed);
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.metrics.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
