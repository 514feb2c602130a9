use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Alerts kept before the oldest are dropped
const MAX_ALERTS: usize = 1000;

/// Metrics collector for capability calls and run activity.
///
/// Every capability call also feeds per-capability statistics that are
/// checked against [`Thresholds`]; crossings raise [`Alert`]s.
pub struct MetricsCollector {
    counters: Arc<Mutex<HashMap<String, Counter>>>,
    gauges: Arc<Mutex<HashMap<String, Gauge>>>,
    histograms: Arc<Mutex<HashMap<String, Histogram>>>,
    tools: Arc<Mutex<BTreeMap<String, ToolStats>>>,
    alerts: Arc<Mutex<VecDeque<Alert>>>,
    thresholds: Thresholds,
}

/// Counter - monotonically increasing value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counter {
    pub name: String,
    pub value: u64,
    pub labels: HashMap<String, String>,
    pub last_updated: DateTime<Utc>,
}

/// Gauge - value that can go up or down
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gauge {
    pub name: String,
    pub value: f64,
    pub labels: HashMap<String, String>,
    pub last_updated: DateTime<Utc>,
}

/// Histogram - tracks distribution of values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Histogram {
    pub name: String,
    pub buckets: Vec<f64>,
    pub counts: Vec<u64>,
    pub sum: f64,
    pub count: u64,
    pub labels: HashMap<String, String>,
    pub last_updated: DateTime<Utc>,
}

/// Point-in-time copy of every metric
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub counters: Vec<Counter>,
    pub gauges: Vec<Gauge>,
    pub histograms: Vec<Histogram>,
}

/// Alerting limits for capability calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Average response time, in milliseconds
    pub response_time_warning_ms: f64,
    pub response_time_critical_ms: f64,
    /// Failed calls over total calls
    pub error_rate_warning: f64,
    pub error_rate_critical: f64,
    /// Error rate is only judged once a capability has more calls than this
    pub min_calls_for_error_rate: u64,
    /// Highest error rate a capability may have and still count as healthy
    pub healthy_error_rate: f64,
    /// Highest error rate before a capability counts as critical
    pub degraded_error_rate: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            response_time_warning_ms: 2000.0,
            response_time_critical_ms: 5000.0,
            error_rate_warning: 0.10,
            error_rate_critical: 0.25,
            min_calls_for_error_rate: 10,
            healthy_error_rate: 0.05,
            degraded_error_rate: 0.15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    Critical,
}

/// A threshold crossing for one capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: uuid::Uuid,
    pub level: AlertLevel,
    pub capability: String,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Running totals for one capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolStats {
    pub capability: String,
    pub total_calls: u64,
    pub failed_calls: u64,
    pub total_duration_ms: f64,
    pub min_duration_ms: f64,
    pub max_duration_ms: f64,
    pub last_call: DateTime<Utc>,
    // Last alert level raised per check, so a level is reported once
    #[serde(skip)]
    latency_level: Option<AlertLevel>,
    #[serde(skip)]
    error_level: Option<AlertLevel>,
}

impl ToolStats {
    fn new(capability: &str) -> Self {
        Self {
            capability: capability.to_string(),
            total_calls: 0,
            failed_calls: 0,
            total_duration_ms: 0.0,
            min_duration_ms: f64::INFINITY,
            max_duration_ms: 0.0,
            last_call: Utc::now(),
            latency_level: None,
            error_level: None,
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.failed_calls as f64 / self.total_calls as f64
        }
    }

    pub fn average_duration_ms(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.total_duration_ms / self.total_calls as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolHealth {
    pub capability: String,
    pub status: HealthStatus,
    pub total_calls: u64,
    pub error_rate: f64,
    pub average_duration_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSummary {
    pub total: usize,
    pub warning: usize,
    pub critical: usize,
}

/// Health of every capability that has been called
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    pub overall: HealthStatus,
    pub tools: Vec<ToolHealth>,
    pub alerts: AlertSummary,
}

// Millisecond buckets for capability latency
const LATENCY_BUCKETS_MS: [f64; 10] = [
    10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0,
];

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_thresholds(Thresholds::default())
    }

    pub fn with_thresholds(thresholds: Thresholds) -> Self {
        Self {
            counters: Arc::new(Mutex::new(HashMap::new())),
            gauges: Arc::new(Mutex::new(HashMap::new())),
            histograms: Arc::new(Mutex::new(HashMap::new())),
            tools: Arc::new(Mutex::new(BTreeMap::new())),
            alerts: Arc::new(Mutex::new(VecDeque::new())),
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Record one capability attempt. `outcome` is "success" or the
    /// failure kind.
    pub fn record_capability_call(
        &self,
        capability: &str,
        action: &str,
        outcome: &str,
        duration_ms: f64,
    ) {
        self.increment_counter(
            "capability_calls_total",
            HashMap::from([
                ("capability".to_string(), capability.to_string()),
                ("action".to_string(), action.to_string()),
                ("outcome".to_string(), outcome.to_string()),
            ]),
        );
        self.observe_histogram(
            "capability_call_duration_ms",
            duration_ms,
            HashMap::from([("capability".to_string(), capability.to_string())]),
        );
        self.record_tool_stats(capability, outcome == "success", duration_ms);
    }

    fn record_tool_stats(&self, capability: &str, success: bool, duration_ms: f64) {
        let raised = {
            let mut tools = self.tools.lock().unwrap();
            let stats = tools
                .entry(capability.to_string())
                .or_insert_with(|| ToolStats::new(capability));

            stats.total_calls += 1;
            if !success {
                stats.failed_calls += 1;
            }
            stats.total_duration_ms += duration_ms;
            stats.min_duration_ms = stats.min_duration_ms.min(duration_ms);
            stats.max_duration_ms = stats.max_duration_ms.max(duration_ms);
            stats.last_call = Utc::now();

            self.check_thresholds(stats)
        };

        if raised.is_empty() {
            return;
        }
        let mut alerts = self.alerts.lock().unwrap();
        for alert in raised {
            tracing::warn!(
                "{:?} alert for {}: {} - {}",
                alert.level,
                alert.capability,
                alert.title,
                alert.message
            );
            if alerts.len() == MAX_ALERTS {
                alerts.pop_front();
            }
            alerts.push_back(alert);
        }
    }

    /// Alerts for levels the capability has newly reached
    fn check_thresholds(&self, stats: &mut ToolStats) -> Vec<Alert> {
        let t = &self.thresholds;
        let mut raised = Vec::new();

        let average = stats.average_duration_ms();
        let latency_level = if average > t.response_time_critical_ms {
            Some(AlertLevel::Critical)
        } else if average > t.response_time_warning_ms {
            Some(AlertLevel::Warning)
        } else {
            None
        };
        if let Some(level) = latency_level.filter(|_| latency_level != stats.latency_level) {
            raised.push(Alert::new(
                level,
                &stats.capability,
                "slow responses",
                format!("average response time {:.0}ms", average),
            ));
        }
        stats.latency_level = latency_level;

        if stats.total_calls > t.min_calls_for_error_rate {
            let rate = stats.error_rate();
            let error_level = if rate > t.error_rate_critical {
                Some(AlertLevel::Critical)
            } else if rate > t.error_rate_warning {
                Some(AlertLevel::Warning)
            } else {
                None
            };
            if let Some(level) = error_level.filter(|_| error_level != stats.error_level) {
                raised.push(Alert::new(
                    level,
                    &stats.capability,
                    "high error rate",
                    format!("error rate {:.1}%", rate * 100.0),
                ));
            }
            stats.error_level = error_level;
        }

        raised
    }

    /// Alerts raised so far, oldest first
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().iter().cloned().collect()
    }

    pub fn tool_stats(&self, capability: &str) -> Option<ToolStats> {
        self.tools.lock().unwrap().get(capability).cloned()
    }

    /// Classify every called capability and summarise the alerts
    pub fn health_report(&self) -> HealthReport {
        let t = &self.thresholds;
        let tools: Vec<ToolHealth> = self
            .tools
            .lock()
            .unwrap()
            .values()
            .map(|stats| {
                let error_rate = stats.error_rate();
                let average = stats.average_duration_ms();
                let status = if error_rate <= t.healthy_error_rate
                    && average <= t.response_time_warning_ms
                {
                    HealthStatus::Healthy
                } else if error_rate <= t.degraded_error_rate
                    && average <= t.response_time_critical_ms
                {
                    HealthStatus::Warning
                } else {
                    HealthStatus::Critical
                };
                ToolHealth {
                    capability: stats.capability.clone(),
                    status,
                    total_calls: stats.total_calls,
                    error_rate,
                    average_duration_ms: average,
                }
            })
            .collect();

        let overall = match tools
            .iter()
            .filter(|h| h.status == HealthStatus::Critical)
            .count()
        {
            0 => HealthStatus::Healthy,
            1 | 2 => HealthStatus::Warning,
            _ => HealthStatus::Critical,
        };

        let alerts = self.alerts.lock().unwrap();
        let count = |level: AlertLevel| alerts.iter().filter(|a| a.level == level).count();
        let summary = AlertSummary {
            total: alerts.len(),
            warning: count(AlertLevel::Warning),
            critical: count(AlertLevel::Critical),
        };

        HealthReport {
            generated_at: Utc::now(),
            overall,
            tools,
            alerts: summary,
        }
    }

    pub fn increment_counter(&self, name: &str, labels: HashMap<String, String>) {
        let mut counters = self.counters.lock().unwrap();
        let key = Self::metric_key(name, &labels);

        counters
            .entry(key)
            .and_modify(|c| {
                c.value += 1;
                c.last_updated = Utc::now();
            })
            .or_insert_with(|| Counter {
                name: name.to_string(),
                value: 1,
                labels,
                last_updated: Utc::now(),
            });
    }

    /// Add to a gauge, creating it at `delta`
    pub fn add_to_gauge(&self, name: &str, delta: f64, labels: HashMap<String, String>) {
        let mut gauges = self.gauges.lock().unwrap();
        let key = Self::metric_key(name, &labels);

        gauges
            .entry(key)
            .and_modify(|g| {
                g.value += delta;
                g.last_updated = Utc::now();
            })
            .or_insert_with(|| Gauge {
                name: name.to_string(),
                value: delta,
                labels,
                last_updated: Utc::now(),
            });
    }

    pub fn observe_histogram(&self, name: &str, value: f64, labels: HashMap<String, String>) {
        let mut histograms = self.histograms.lock().unwrap();
        let key = Self::metric_key(name, &labels);

        let histogram = histograms.entry(key).or_insert_with(|| Histogram {
            name: name.to_string(),
            buckets: LATENCY_BUCKETS_MS.to_vec(),
            counts: vec![0; LATENCY_BUCKETS_MS.len()],
            sum: 0.0,
            count: 0,
            labels,
            last_updated: Utc::now(),
        });

        histogram.sum += value;
        histogram.count += 1;
        for (i, bucket) in histogram.buckets.iter().enumerate() {
            if value <= *bucket {
                histogram.counts[i] += 1;
            }
        }
        histogram.last_updated = Utc::now();
    }

    pub fn get_counter(&self, name: &str, labels: &HashMap<String, String>) -> Option<Counter> {
        let key = Self::metric_key(name, labels);
        self.counters.lock().unwrap().get(&key).cloned()
    }

    pub fn get_gauge(&self, name: &str, labels: &HashMap<String, String>) -> Option<Gauge> {
        let key = Self::metric_key(name, labels);
        self.gauges.lock().unwrap().get(&key).cloned()
    }

    pub fn get_histogram(&self, name: &str, labels: &HashMap<String, String>) -> Option<Histogram> {
        let key = Self::metric_key(name, labels);
        self.histograms.lock().unwrap().get(&key).cloned()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.lock().unwrap().values().cloned().collect(),
            gauges: self.gauges.lock().unwrap().values().cloned().collect(),
            histograms: self.histograms.lock().unwrap().values().cloned().collect(),
        }
    }

    /// Generate a unique key for a metric with labels
    fn metric_key(name: &str, labels: &HashMap<String, String>) -> String {
        if labels.is_empty() {
            return name.to_string();
        }

        let mut sorted_labels: Vec<_> = labels.iter().collect();
        sorted_labels.sort_by_key(|(k, _)| *k);

        let label_str = sorted_labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");

        format!("{}:{}", name, label_str)
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Alert {
    fn new(level: AlertLevel, capability: &str, title: &str, message: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            level,
            capability: capability.to_string(),
            title: format!("{} {}", capability, title),
            message,
            timestamp: Utc::now(),
        }
    }
}

impl Histogram {
    /// Upper bucket bound covering the given percentile
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.count == 0 || !(0.0..=100.0).contains(&p) {
            return None;
        }

        let target_count = ((self.count as f64) * (p / 100.0)).ceil() as u64;

        self.counts
            .iter()
            .position(|count| *count >= target_count)
            .map(|i| self.buckets[i])
    }

    pub fn average(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}
