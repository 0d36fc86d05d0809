// Output formatting for CLI

use serde::Serialize;
use serde_json::json;
use signload_flow::prelude::*;

#[derive(Clone, Copy)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }

    pub fn print_value<T: Serialize>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("failed to serialize output: {}", e),
        }
    }
}

/// Print a simple key-value pair for text output
pub fn print_field(label: &str, value: &str) {
    println!("{:<18} {}", format!("{}:", label), value);
}

/// Print a table header
pub fn print_table_header(columns: &[(&str, usize)]) {
    let header: String = columns
        .iter()
        .map(|(name, width)| format!("{:<width$}", name, width = width))
        .collect::<Vec<_>>()
        .join("  ");
    println!("{}", header);
}

/// Print a table row
pub fn print_table_row(values: &[(&str, usize)]) {
    let row: String = values
        .iter()
        .map(|(val, width)| {
            let s = if val.chars().count() > *width {
                let cut: String = val.chars().take(width.saturating_sub(3)).collect();
                format!("{}...", cut)
            } else {
                val.to_string()
            };
            format!("{:<width$}", s, width = width)
        })
        .collect::<Vec<_>>()
        .join("  ");
    println!("{}", row);
}

fn mask(secret: &str) -> &'static str {
    if secret.is_empty() {
        "(unset)"
    } else {
        "****"
    }
}

pub fn print_config(config: &SignloadConfig, format: OutputFormat) {
    let thresholds: Vec<&str> = config.thresholds.iter().map(|t| t.expression()).collect();
    let iterations = config
        .load
        .iterations
        .map(|n| n.to_string())
        .unwrap_or_else(|| "unlimited".to_string());
    let duration = config
        .load
        .max_duration
        .map(|d| humantime::format_duration(d).to_string())
        .unwrap_or_else(|| "none".to_string());

    if let OutputFormat::Json = format {
        format.print_value(&json!({
            "base_url": config.base_url,
            "client_id": config.client_id,
            "username": config.username,
            "flow": config.flow.to_string(),
            "pdf_path": config.pdf_path,
            "number_of_uploads": config.number_of_uploads,
            "sign_per_doc": config.sign_per_doc,
            "vus": config.load.vus,
            "iterations": config.load.iterations,
            "duration_secs": config.load.max_duration.map(|d| d.as_secs_f64()),
            "think_time": config.think_time.to_string(),
            "thresholds": thresholds,
            "report_dir": config.report_dir,
            "capture_responses": config.capture_responses,
        }));
        return;
    }

    print_field("Base URL", &config.base_url);
    print_field("Client ID", &config.client_id);
    print_field("Client secret", mask(&config.client_secret));
    print_field("Username", &config.username);
    print_field("Password", mask(&config.password));
    print_field("OTP pin", mask(&config.otp_pin));
    print_field("Flow", &config.flow.to_string());
    print_field("PDF", &config.pdf_path.display().to_string());
    print_field("Uploads", &config.number_of_uploads.to_string());
    print_field("Signs per doc", &config.sign_per_doc.to_string());
    print_field("VUs", &config.load.vus.to_string());
    print_field("Iterations", &iterations);
    print_field("Duration", &duration);
    print_field("Think time", &config.think_time.to_string());
    print_field("Thresholds", &thresholds.join(", "));
    print_field("Report dir", &config.report_dir.display().to_string());
}

pub fn print_run(
    report: &AggregateReport,
    artifacts: &ReportArtifacts,
    summary: &RunSummary,
    format: OutputFormat,
) {
    if let OutputFormat::Json = format {
        format.print_value(report);
        return;
    }

    let flow = &report.flow;
    println!();
    print_field("Flow", &flow.name);
    print_field("Duration", &format!("{:.2}s", summary.elapsed.as_secs_f64()));
    print_field(
        "Iterations",
        &format!(
            "{} completed of {} started",
            summary.iterations_completed, summary.iterations_started
        ),
    );
    print_field(
        "Succeeded",
        &format!("{} ({:.2}%)", flow.success_count, flow.success_pct),
    );
    print_field(
        "Failed",
        &format!("{} ({:.2}%)", flow.failure_count, flow.failure_pct),
    );
    for (state, count) in &flow.aborted_at {
        print_field(&format!("  aborted at {}", state), &count.to_string());
    }
    if summary.cancelled_at_deadline {
        print_field("Note", "in-flight iterations were cancelled at the deadline");
    }

    println!();
    let columns = [
        ("STEP", 18),
        ("COUNT", 7),
        ("RATE/S", 8),
        ("SUCCESS%", 9),
        ("AVG_MS", 10),
        ("P95_MS", 10),
        ("P99_MS", 10),
    ];
    print_table_header(&columns);
    for step in &report.steps {
        let cells = [
            step.name.clone(),
            step.count.to_string(),
            format!("{:.2}", step.rate_per_sec),
            format!("{:.2}", step.success_pct),
            format!("{:.2}", step.avg_ms),
            format!("{:.2}", step.p95_ms),
            format!("{:.2}", step.p99_ms),
        ];
        let row: Vec<(&str, usize)> = cells
            .iter()
            .zip(columns.iter())
            .map(|(cell, (_, width))| (cell.as_str(), *width))
            .collect();
        print_table_row(&row);
    }

    if !report.thresholds.is_empty() {
        println!();
        for t in &report.thresholds {
            let verdict = if t.passed { "PASS" } else { "FAIL" };
            print_field(verdict, &format!("{} (observed {:.4})", t.expression, t.observed));
        }
    }

    println!();
    let paths = [
        ("Report", &artifacts.report),
        ("Summary", &artifacts.summary),
        ("Steps CSV", &artifacts.steps_csv),
        ("Responses", &artifacts.responses),
    ];
    for (label, path) in paths {
        if let Some(path) = path {
            print_field(label, &path.display().to_string());
        }
    }
}
