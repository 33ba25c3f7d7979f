//! Prometheus text exposition for engine metrics
//!
//! Served at /metrics by the region API server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use std::fmt::Write;

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, site: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Write one counter per transition kind under a shared name
fn write_transitions(output: &mut String, site: &str, summary: &MetricsSummary) {
    let name = "geofence_transitions_total";
    let _ = writeln!(output, "# HELP {name} Transitions forwarded to sinks");
    let _ = writeln!(output, "# TYPE {name} counter");
    for (kind, val) in [
        ("enter", summary.enter_total),
        ("exit", summary.exit_total),
        ("dwell", summary.dwell_total),
    ] {
        let _ = writeln!(output, "{name}{{site=\"{site}\",kind=\"{kind}\"}} {val}");
    }
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(metrics: &Metrics, site: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_metric(&mut output, "geofence_fixes_total", "Fixes evaluated", MetricType::Counter, site, summary.fixes_total);
    let _ = writeln!(output, "# HELP geofence_fixes_per_sec Fixes evaluated per second");
    let _ = writeln!(output, "# TYPE geofence_fixes_per_sec gauge");
    let _ = writeln!(output, "geofence_fixes_per_sec{{site=\"{site}\"}} {:.2}", summary.fixes_per_sec);
    write_metric(&mut output, "geofence_fixes_stale_total", "Fixes rejected as stale", MetricType::Counter, site, summary.fixes_stale);
    write_metric(
        &mut output,
        "geofence_fixes_rejected_total",
        "Fixes rejected as invalid or inaccurate",
        MetricType::Counter,
        site,
        summary.fixes_rejected,
    );
    write_metric(
        &mut output,
        "geofence_fixes_dropped_total",
        "Fixes dropped because the engine queue was full",
        MetricType::Counter,
        site,
        summary.fixes_dropped,
    );
    write_histogram(
        &mut output,
        "geofence_fix_latency_us",
        "Fix evaluation latency in microseconds",
        site,
        &summary.lat_buckets,
        summary.avg_fix_latency_us,
    );

    write_metric(&mut output, "geofence_ticks_total", "Scheduler ticks processed", MetricType::Counter, site, summary.ticks_total);
    write_transitions(&mut output, site, &summary);
    write_metric(
        &mut output,
        "geofence_transitions_suppressed_total",
        "Duplicate transitions suppressed",
        MetricType::Counter,
        site,
        summary.suppressed_total,
    );

    write_metric(
        &mut output,
        "geofence_notify_dropped_total",
        "Notifications dropped because the notify channel was full",
        MetricType::Counter,
        site,
        summary.notify_dropped,
    );
    write_metric(
        &mut output,
        "geofence_notify_delivered_total",
        "Notifications handed to all sinks",
        MetricType::Counter,
        site,
        summary.notify_delivered,
    );
    write_metric(&mut output, "geofence_sink_failures_total", "Sink delivery failures", MetricType::Counter, site, summary.sink_failures);
    write_histogram(
        &mut output,
        "geofence_delivery_latency_us",
        "Sink delivery latency in microseconds",
        site,
        &summary.delivery_lat_buckets,
        summary.delivery_lat_avg_us,
    );

    write_metric(&mut output, "geofence_regions_active", "Registered regions", MetricType::Gauge, site, summary.regions_active);
    write_metric(&mut output, "geofence_regions_expired_total", "Regions removed by expiry", MetricType::Counter, site, summary.regions_expired);
    write_metric(
        &mut output,
        "geofence_command_queue_depth",
        "Engine command queue depth",
        MetricType::Gauge,
        site,
        summary.command_queue_depth,
    );

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::TransitionKind;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();

        metrics.record_fix_processed(150);
        metrics.record_fix_processed(250);
        metrics.record_transition(TransitionKind::Enter);
        metrics.record_transition(TransitionKind::Dwell);
        metrics.set_regions_active(3);

        let output = format_prometheus_metrics(&metrics, "lab");

        assert!(output.contains("geofence_fixes_total{site=\"lab\"} 2"));
        assert!(output.contains("geofence_fix_latency_us_bucket{site=\"lab\",le=\"200\"} 1"));
        assert!(output.contains("geofence_fix_latency_us_bucket{site=\"lab\",le=\"+Inf\"} 2"));
        assert!(output.contains("geofence_transitions_total{site=\"lab\",kind=\"enter\"} 1"));
        assert!(output.contains("geofence_transitions_total{site=\"lab\",kind=\"exit\"} 0"));
        assert!(output.contains("geofence_regions_active{site=\"lab\"} 3"));
        assert!(output.contains("# TYPE geofence_regions_active gauge"));
    }
}
