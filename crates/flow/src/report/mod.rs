//! Run reports
//!
//! Built once at teardown from a [`MetricsSnapshot`]:
//!
//! | File                  | Contents                                        |
//! |-----------------------|-------------------------------------------------|
//! | `report.html`         | Rendered template (`report.txt` on failure)     |
//! | `summary.json`        | Aggregate report plus every raw series value    |
//! | `steps.csv`           | One row per step                                |
//! | `response_bodies.json`| Captured responses, when the journal is enabled |
//!
//! Writing never fails as a whole: each file is attempted independently and
//! problems are logged.

mod aggregate;
mod render;

pub use aggregate::{AggregateReport, FlowRow, StepRow};
pub use render::{render, render_html, render_text, RenderedReport, REPORT_TEMPLATE};

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use thiserror::Error;
use tracing::{error, info};

use crate::journal::ResponseJournal;
use crate::metrics::MetricsSnapshot;

pub const SUMMARY_FILE: &str = "summary.json";
pub const STEPS_CSV_FILE: &str = "steps.csv";
pub const RESPONSES_FILE: &str = "response_bodies.json";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Configuration for report generation
#[derive(Debug, Clone)]
pub struct ReportConfig {
    /// Output directory for reports
    pub output_dir: PathBuf,
    /// Template override; the built-in one is used when `None`
    pub template: Option<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("reports"),
            template: None,
        }
    }
}

/// Paths of the files that were written
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportArtifacts {
    pub report: Option<PathBuf>,
    pub summary: Option<PathBuf>,
    pub steps_csv: Option<PathBuf>,
    pub responses: Option<PathBuf>,
    /// The plain-text fallback was written instead of HTML
    pub used_fallback: bool,
}

pub struct ReportWriter {
    config: ReportConfig,
}

impl ReportWriter {
    pub fn new(config: ReportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    /// Write every report file; failures are logged, never returned
    pub fn write(
        &self,
        report: &AggregateReport,
        snapshot: &MetricsSnapshot,
        journal: Option<&ResponseJournal>,
    ) -> ReportArtifacts {
        let dir = &self.config.output_dir;
        if let Err(e) = fs::create_dir_all(dir) {
            error!(dir = %dir.display(), error = %e, "cannot create report directory");
            return ReportArtifacts::default();
        }

        let template = self.config.template.as_deref().unwrap_or(REPORT_TEMPLATE);
        let rendered = render(report, template);

        let artifacts = ReportArtifacts {
            report: logged(
                "report",
                write_file(dir, rendered.file_name(), rendered.contents()),
            ),
            summary: logged(SUMMARY_FILE, write_summary(dir, report, snapshot)),
            steps_csv: logged(STEPS_CSV_FILE, write_steps_csv(dir, report)),
            responses: journal.and_then(|j| logged(RESPONSES_FILE, write_journal(dir, j))),
            used_fallback: rendered.is_fallback(),
        };

        if let Some(path) = &artifacts.report {
            info!(path = %path.display(), "report written");
        }
        artifacts
    }
}

fn logged(what: &str, result: Result<PathBuf, ReportError>) -> Option<PathBuf> {
    match result {
        Ok(path) => Some(path),
        Err(e) => {
            error!(file = what, error = %e, "failed to write report file");
            None
        }
    }
}

fn write_file(dir: &Path, name: &str, contents: &str) -> Result<PathBuf, ReportError> {
    let path = dir.join(name);
    fs::write(&path, contents)?;
    // Absolute path for clickable terminal links
    Ok(path.canonicalize().unwrap_or(path))
}

fn write_summary(
    dir: &Path,
    report: &AggregateReport,
    snapshot: &MetricsSnapshot,
) -> Result<PathBuf, ReportError> {
    let summary = json!({
        "report": report,
        "metrics": snapshot.key_values(),
    });
    write_file(dir, SUMMARY_FILE, &serde_json::to_string_pretty(&summary)?)
}

fn write_steps_csv(dir: &Path, report: &AggregateReport) -> Result<PathBuf, ReportError> {
    let path = dir.join(STEPS_CSV_FILE);
    let mut writer = csv::Writer::from_path(&path)?;
    for step in &report.steps {
        writer.serialize(step)?;
    }
    writer.flush()?;
    Ok(path.canonicalize().unwrap_or(path))
}

fn write_journal(dir: &Path, journal: &ResponseJournal) -> Result<PathBuf, ReportError> {
    write_file(dir, RESPONSES_FILE, &journal.to_json()?)
}
