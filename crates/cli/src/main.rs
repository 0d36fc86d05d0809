// Signload CLI
//
// Design Decision: Configuration comes from SIGNLOAD_* environment variables (and .env);
// flags only override the load shape and outputs.
// Design Decision: Exit code reflects thresholds only; failed iterations are data, not errors.

mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use signload_flow::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use output::OutputFormat;

#[derive(Parser)]
#[command(name = "signload")]
#[command(about = "Signload - Load test the document-signing API flow")]
#[command(version)]
pub struct Cli {
    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json"])]
    pub output: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the load test and write reports
    Run(RunArgs),

    /// Show the resolved configuration (secrets masked)
    Config(RunArgs),
}

#[derive(Args, Clone)]
pub struct RunArgs {
    /// Concurrent virtual users
    #[arg(long, env = "SIGNLOAD_VUS")]
    pub vus: Option<usize>,

    /// Total iterations across all virtual users
    #[arg(long, env = "SIGNLOAD_ITERATIONS")]
    pub iterations: Option<u64>,

    /// Maximum run duration (e.g. 30s, 5m)
    #[arg(long, env = "SIGNLOAD_DURATION", value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// Pause after each iteration: none, 500ms, or 1s..3s
    #[arg(long, env = "SIGNLOAD_THINK_TIME")]
    pub think_time: Option<ThinkTime>,

    /// Flow variant: basic or full
    #[arg(long, env = "SIGNLOAD_FLOW")]
    pub flow: Option<FlowVariant>,

    /// Comma-separated thresholds, e.g. "upload_file:p95<800,flow:success_rate>0.95"
    #[arg(long, env = "SIGNLOAD_THRESHOLDS")]
    pub thresholds: Option<String>,

    /// Directory for report files
    #[arg(long, env = "SIGNLOAD_REPORT_DIR")]
    pub report_dir: Option<PathBuf>,

    /// PDF uploaded by every iteration
    #[arg(long, env = "SIGNLOAD_PDF_PATH")]
    pub pdf: Option<PathBuf>,

    /// Keep response bodies and write them next to the report
    #[arg(long)]
    pub capture_responses: bool,
}

impl RunArgs {
    /// Environment configuration with the flag overrides applied
    fn resolve(&self) -> anyhow::Result<SignloadConfig> {
        let config = SignloadConfig::from_env().context("invalid configuration")?;
        self.apply(config)
    }

    /// Apply flag overrides, then re-check credentials for the final flow
    fn apply(&self, mut config: SignloadConfig) -> anyhow::Result<SignloadConfig> {
        let load = config.load;
        config.load = LoadProfile::new(
            self.vus.unwrap_or(load.vus),
            self.iterations.or(load.iterations.filter(|_| self.duration.is_none())),
            self.duration.or(load.max_duration),
        );
        if let Some(think_time) = self.think_time {
            config.think_time = think_time;
        }
        if let Some(flow) = self.flow {
            config.flow = flow;
        }
        if let Some(list) = &self.thresholds {
            config.thresholds = parse_thresholds(list).context("invalid --thresholds")?;
        }
        if let Some(dir) = &self.report_dir {
            config.report_dir = dir.clone();
        }
        if let Some(pdf) = &self.pdf {
            config.pdf_path = pdf.clone();
        }
        config.capture_responses |= self.capture_responses;

        config
            .validate()
            .with_context(|| format!("invalid configuration for the {} flow", config.flow))?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signload=info,signload_flow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let output_format = OutputFormat::from_str(&cli.output);

    match cli.command {
        Commands::Run(args) => run(args.resolve()?, output_format).await,
        Commands::Config(args) => {
            output::print_config(&args.resolve()?, output_format);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(config: SignloadConfig, output_format: OutputFormat) -> anyhow::Result<ExitCode> {
    let run_id = Uuid::now_v7();
    tracing::info!(%run_id, flow = %config.flow, base_url = %config.base_url, "signload starting");

    let document = config.load_document()?;
    let definition = Arc::new(flow_for(config.flow, config.signing_config(document)));
    let client = Arc::new(
        ReqwestClient::new(config.request_timeout).context("failed to build HTTP client")?,
    );
    let sink = Arc::new(MetricsSink::new());
    let journal = config
        .capture_responses
        .then(|| Arc::new(ResponseJournal::default()));

    let mut orchestrator = FlowOrchestrator::new(definition.clone(), client, sink)
        .with_think_time(config.think_time);
    if let Some(journal) = &journal {
        orchestrator = orchestrator.with_journal(journal.clone());
    }

    let summary = LoadRunner::new(config.load)
        .run(Arc::new(orchestrator))
        .await;

    let title = format!("Document Signing Load Test ({} flow)", config.flow);
    let report = AggregateReport::from_snapshot(&title, &definition, &summary.snapshot);
    let results = evaluate_all(&config.thresholds, &report);
    let report = report.with_thresholds(results);

    let artifacts = ReportWriter::new(ReportConfig {
        output_dir: config.report_dir.clone(),
        template: None,
    })
    .write(&report, &summary.snapshot, journal.as_deref());

    if let Some(journal) = &journal {
        if journal.dropped() > 0 {
            tracing::warn!(dropped = journal.dropped(), "response journal was full");
        }
    }

    output::print_run(&report, &artifacts, &summary, output_format);

    if report.thresholds_passed() {
        tracing::info!(%run_id, "signload finished");
        Ok(ExitCode::SUCCESS)
    } else {
        let failed: Vec<&str> = report
            .thresholds
            .iter()
            .filter(|t| !t.passed)
            .map(|t| t.expression.as_str())
            .collect();
        tracing::error!(%run_id, ?failed, "thresholds failed");
        Ok(ExitCode::FAILURE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_overrides() {
        let cli = Cli::try_parse_from([
            "signload",
            "run",
            "--vus",
            "4",
            "--duration",
            "90s",
            "--think-time",
            "1s..2s",
            "--flow",
            "full",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.vus, Some(4));
        assert_eq!(args.duration, Some(Duration::from_secs(90)));
        assert_eq!(args.flow, Some(FlowVariant::Full));
        assert_eq!(
            args.think_time,
            Some(ThinkTime::Uniform {
                min: Duration::from_secs(1),
                max: Duration::from_secs(2)
            })
        );
    }

    fn env_config(pairs: &[(&str, &str)]) -> SignloadConfig {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SignloadConfig::from_lookup(|key| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        })
        .unwrap()
    }

    const BASIC_ENV: [(&str, &str); 4] = [
        ("SIGNLOAD_BASE_URL", "http://api"),
        ("SIGNLOAD_CLIENT_ID", "client"),
        ("SIGNLOAD_CLIENT_SECRET", "secret"),
        ("SIGNLOAD_USERNAME", "signer"),
    ];

    fn run_args(argv: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        args
    }

    #[test]
    fn test_flow_flag_requires_full_credentials() {
        let args = run_args(&["signload", "run", "--flow", "full"]);

        let err = args.apply(env_config(&BASIC_ENV)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::Missing("SIGNLOAD_PASSWORD"))
        ));

        let mut env = BASIC_ENV.to_vec();
        env.extend([("SIGNLOAD_PASSWORD", "pw"), ("SIGNLOAD_OTP_PIN", "123456")]);
        let config = args.apply(env_config(&env)).unwrap();
        assert_eq!(config.flow, FlowVariant::Full);
    }

    #[test]
    fn test_duration_flag_drops_default_iteration_limit() {
        let args = run_args(&["signload", "run", "--duration", "30s"]);
        let config = args.apply(env_config(&BASIC_ENV)).unwrap();
        assert_eq!(config.load.iterations, None);
        assert_eq!(config.load.max_duration, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_cli_rejects_unknown_flow() {
        assert!(Cli::try_parse_from(["signload", "run", "--flow", "medium"]).is_err());
    }
}
