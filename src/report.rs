//! Text and CSV renderings of a [`RunReport`].
//!
//! Both renderings are produced from the same [`ReportRow`] list, so every
//! value appears with identical formatting in each.

use std::fs;
use std::path::{Path, PathBuf};

use colored::*;

use crate::aggregator::names;
use crate::error::{BenchError, BenchResult};
use crate::models::metrics::{LatencySummary, Outcome, RunReport};

const CHECK_FAILURES_SHOWN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReportValue {
    Count(u64),
    Millis(f64),
    Ratio(f64),
    Seconds(f64),
    PerSecond(f64),
}

impl ReportValue {
    pub fn render(&self) -> String {
        match self {
            ReportValue::Count(n) => n.to_string(),
            ReportValue::Millis(v) | ReportValue::Seconds(v) | ReportValue::PerSecond(v) => {
                format!("{:.2}", v)
            }
            ReportValue::Ratio(v) => format!("{:.4}", v),
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            ReportValue::Count(_) => "",
            ReportValue::Millis(_) => "ms",
            ReportValue::Ratio(_) => "",
            ReportValue::Seconds(_) => "s",
            ReportValue::PerSecond(_) => "req/s",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub key: String,
    pub value: ReportValue,
}

impl ReportRow {
    fn new(key: impl Into<String>, value: ReportValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Counters always listed, in this order, even when zero.
fn fixed_counters() -> Vec<String> {
    let mut keys: Vec<String> = Outcome::ALL
        .iter()
        .map(|o| format!("{}_{}", names::RESERVE_PREFIX, o.counter_suffix()))
        .collect();
    keys.push(names::CONFIRM_OK.to_string());
    keys.push(names::CONFIRM_ERR.to_string());
    keys.push(names::NET_FAILED.to_string());
    keys
}

/// `latency_reserve` -> `reserve`, `latency_reserve:hot_on` -> `hot_on.reserve`.
fn latency_key(metric: &str, stat: &str) -> String {
    let (base, scope) = match metric.split_once(':') {
        Some((base, scope)) => (base, Some(scope)),
        None => (metric, None),
    };
    let base = base.strip_prefix("latency_").unwrap_or(base);
    match scope {
        Some(scope) => format!("{scope}.{base}_{stat}"),
        None => format!("{base}_{stat}"),
    }
}

fn scoped_key(metric: &str, suffix: &str) -> String {
    match metric.split_once(':') {
        Some((base, scope)) => format!("{scope}.{base}_{suffix}"),
        None => format!("{metric}_{suffix}"),
    }
}

fn latency_rows(rows: &mut Vec<ReportRow>, metric: &str, summary: &LatencySummary) {
    rows.push(ReportRow::new(
        latency_key(metric, "count"),
        ReportValue::Count(summary.count),
    ));
    let stats = [
        ("min", summary.min),
        ("p50", summary.p50),
        ("p95", summary.p95),
        ("p99", summary.p99),
        ("max", summary.max),
    ];
    for (stat, value) in stats {
        rows.push(ReportRow::new(latency_key(metric, stat), ReportValue::Millis(value)));
    }
}

/// Flattens a report into its fixed row order.
pub fn report_rows(report: &RunReport) -> Vec<ReportRow> {
    let mut rows = Vec::new();

    let fixed = fixed_counters();
    for key in &fixed {
        let count = report.counters.get(key).copied().unwrap_or(0);
        rows.push(ReportRow::new(key.clone(), ReportValue::Count(count)));
    }
    for (key, count) in &report.counters {
        if !fixed.contains(key) {
            rows.push(ReportRow::new(key.clone(), ReportValue::Count(*count)));
        }
    }

    let empty = LatencySummary::default();
    for metric in [names::LATENCY_RESERVE, names::LATENCY_CONFIRM] {
        latency_rows(&mut rows, metric, report.latencies.get(metric).unwrap_or(&empty));
    }
    for (metric, summary) in &report.latencies {
        if metric != names::LATENCY_RESERVE && metric != names::LATENCY_CONFIRM {
            latency_rows(&mut rows, metric, summary);
        }
    }

    for (metric, rate) in &report.rates {
        rows.push(ReportRow::new(
            scoped_key(metric, "rate"),
            ReportValue::Ratio(rate.rate()),
        ));
    }

    for (check, summary) in &report.checks {
        rows.push(ReportRow::new(
            format!("{check}_passes"),
            ReportValue::Count(summary.passes),
        ));
        rows.push(ReportRow::new(
            format!("{check}_fails"),
            ReportValue::Count(summary.fails),
        ));
    }

    for scenario in &report.scenarios {
        rows.push(ReportRow::new(
            format!("{}.iterations", scenario.name),
            ReportValue::Count(scenario.iterations),
        ));
        rows.push(ReportRow::new(
            format!("{}.stragglers", scenario.name),
            ReportValue::Count(scenario.stragglers),
        ));
        if scenario.dropped > 0 {
            rows.push(ReportRow::new(
                format!("{}.dropped_iterations", scenario.name),
                ReportValue::Count(scenario.dropped),
            ));
        }
    }

    rows.push(ReportRow::new("total_requests", ReportValue::Count(report.total_requests)));
    rows.push(ReportRow::new("elapsed", ReportValue::Seconds(report.elapsed_secs)));
    rows.push(ReportRow::new("throughput", ReportValue::PerSecond(report.throughput)));
    rows.push(ReportRow::new(
        "threshold_passed",
        ReportValue::Count(u64::from(report.threshold.passed())),
    ));

    let host = &report.host;
    rows.push(ReportRow::new("host.cpu_cores", ReportValue::Count(host.cpu_cores)));
    rows.push(ReportRow::new(
        "host.total_memory_mb",
        ReportValue::Count(host.total_memory_mb()),
    ));
    rows.push(ReportRow::new(
        "host.available_memory_mb",
        ReportValue::Count(host.available_memory_mb()),
    ));
    rows
}

/// Human-readable multi-line summary.
pub fn render_text(report: &RunReport) -> String {
    let rows = report_rows(report);
    let width = rows.iter().map(|r| r.key.len()).max().unwrap_or(0) + 2;

    let mut lines = vec![
        format!("--- {} ---", report.title),
        format!("BASE={}", report.target_url),
        format!("MENU_ID={}", report.menu_id),
        format!("TIMESTAMP={}", report.timestamp.format("%Y/%m/%d %H:%M:%S")),
        format!("HOST={}", report.host),
        String::new(),
    ];
    for row in &rows {
        let label = format!("{}:", row.key);
        let line = format!("{:<width$}{} {}", label, row.value.render(), row.value.unit());
        lines.push(line.trim_end().to_string());
    }
    lines.push(String::new());
    lines.push(verdict_line(report));
    lines.extend(check_failure_lines(report));
    lines.push("-".repeat(width + 12));
    lines.join("\n")
}

/// `metric,value` table with the same rows as [`render_text`].
pub fn render_csv(report: &RunReport) -> BenchResult<String> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(["metric", "value"])?;
    for row in report_rows(report) {
        wtr.write_record([row.key.as_str(), row.value.render().as_str()])?;
    }
    let bytes = wtr.into_inner().map_err(|e| BenchError::Io(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn verdict_line(report: &RunReport) -> String {
    let verdict = &report.threshold;
    if verdict.passed() {
        format!(
            "THRESHOLD PASSED: unexpected_fail < {:.4}",
            verdict.max_failure_rate
        )
    } else {
        let breaches: Vec<String> = verdict
            .breaches
            .iter()
            .map(|(name, rate)| format!("{name}={rate:.4}"))
            .collect();
        format!(
            "THRESHOLD FAILED: {} (limit {:.4})",
            breaches.join(", "),
            verdict.max_failure_rate
        )
    }
}

fn check_failure_lines(report: &RunReport) -> Vec<String> {
    if report.check_failures.is_empty() {
        return Vec::new();
    }
    let mut lines = vec![format!("CHECK FAILURES ({}):", report.check_failures.len())];
    for failure in report.check_failures.iter().take(CHECK_FAILURES_SHOWN) {
        lines.push(format!("  {} | {}", failure.check, failure.detail));
    }
    if report.check_failures.len() > CHECK_FAILURES_SHOWN {
        lines.push(format!(
            "  ... {} more",
            report.check_failures.len() - CHECK_FAILURES_SHOWN
        ));
    }
    lines
}

/// Writes the summary and CSV into `out_dir`, returning both paths.
pub fn write_report(
    report: &RunReport,
    out_dir: &Path,
    summary_file: &str,
    metrics_file: &str,
) -> BenchResult<(PathBuf, PathBuf)> {
    fs::create_dir_all(out_dir)?;
    let summary_path = out_dir.join(summary_file);
    let metrics_path = out_dir.join(metrics_file);
    fs::write(&summary_path, render_text(report))?;
    fs::write(&metrics_path, render_csv(report)?)?;
    Ok((summary_path, metrics_path))
}

/// Console echo of the summary.
pub fn print_report(report: &RunReport) {
    println!();
    println!("{}", format!("======== {} ========", report.title).white().bold().on_blue());
    println!("{} {}", "Timestamp :".blue().bold(), report.timestamp.format("%Y/%m/%d %H:%M:%S"));
    println!("{} {}", "Target    :".blue().bold(), report.target_url);
    println!("{} {}", "Menu id   :".blue().bold(), report.menu_id);
    println!("{} {}", "Host      :".blue().bold(), report.host);
    println!();

    for row in report_rows(report) {
        let label = format!("{:<44}", format!("{}:", row.key));
        let label = if row.key.ends_with("_ok") || row.key.ends_with("_passes") {
            label.green().bold()
        } else if row.key.ends_with("_409") || row.key.ends_with("_503") {
            label.yellow().bold()
        } else if row.key.contains("err")
            || row.key.contains("fail")
            || row.key.contains("other")
            || row.key.ends_with("_401")
        {
            label.red().bold()
        } else {
            label.cyan().bold()
        };
        println!("{}{} {}", label, row.value.render().bold(), row.value.unit());
    }

    println!();
    let verdict = verdict_line(report);
    if report.threshold.passed() {
        println!("{}", verdict.green().bold());
    } else {
        println!("{}", verdict.red().bold());
    }
    for line in check_failure_lines(report) {
        println!("{}", line.red());
    }
}
