//! Run configuration
//!
//! Loaded from environment variables (a `.env` file is honoured by the
//! binary). Empty values count as unset.
//!
//! | Variable                        | Default     |
//! |---------------------------------|-------------|
//! | `SIGNLOAD_BASE_URL`             | required    |
//! | `SIGNLOAD_CLIENT_ID`            | required    |
//! | `SIGNLOAD_CLIENT_SECRET`        | required    |
//! | `SIGNLOAD_USERNAME`             | required    |
//! | `SIGNLOAD_PASSWORD`             | required for the full flow |
//! | `SIGNLOAD_OTP_PIN`              | required for the full flow |
//! | `SIGNLOAD_PDF_PATH`             | `sample.pdf` |
//! | `SIGNLOAD_NUMBER_OF_UPLOADS`    | `1`         |
//! | `SIGNLOAD_SIGN_PER_DOC`         | `1`         |
//! | `SIGNLOAD_REQUEST_TIMEOUT_SECS` | `30`        |
//! | `SIGNLOAD_POLL_INTERVAL_MS`     | `1000`      |
//! | `SIGNLOAD_MAX_STATUS_CHECKS`    | `300`       |
//! | `SIGNLOAD_VUS`                  | `1`         |
//! | `SIGNLOAD_ITERATIONS`           | `1` when no duration is set |
//! | `SIGNLOAD_DURATION`             | none (`30s`, `5m`, ...) |
//! | `SIGNLOAD_THINK_TIME`           | `none` (`500ms`, `1s..3s`) |
//! | `SIGNLOAD_FLOW`                 | `basic`     |
//! | `SIGNLOAD_THRESHOLDS`           | none        |
//! | `SIGNLOAD_REPORT_DIR`           | `reports`   |
//! | `SIGNLOAD_CAPTURE_RESPONSES`    | `false`     |

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::flow::ThinkTime;
use crate::http::FileAttachment;
use crate::runner::LoadProfile;
use crate::signing::{
    FlowVariant, SignaturePlacement, SigningConfig, DEFAULT_SIGNATURE_IMAGE,
};
use crate::thresholds::{parse_thresholds, Threshold};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("invalid {var}='{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("cannot read document {path}: {source}")]
    Document {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct SignloadConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub otp_pin: String,
    pub pdf_path: PathBuf,
    pub number_of_uploads: u32,
    pub sign_per_doc: u32,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub max_status_checks: u32,
    pub flow: FlowVariant,
    pub load: LoadProfile,
    pub think_time: ThinkTime,
    pub thresholds: Vec<Threshold>,
    pub report_dir: PathBuf,
    pub capture_responses: bool,
}

impl SignloadConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from any key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let flow = parse_or(&get, "SIGNLOAD_FLOW", FlowVariant::Basic)?;

        let load = LoadProfile::new(
            parse_or(&get, "SIGNLOAD_VUS", 1usize)?,
            parse_opt(&get, "SIGNLOAD_ITERATIONS")?,
            duration_opt(&get, "SIGNLOAD_DURATION")?,
        );

        let thresholds = match get("SIGNLOAD_THRESHOLDS") {
            Some(list) => parse_thresholds(&list).map_err(|e| ConfigError::Invalid {
                var: "SIGNLOAD_THRESHOLDS",
                value: list.clone(),
                reason: e.to_string(),
            })?,
            None => Vec::new(),
        };

        let config = Self {
            base_url: required("SIGNLOAD_BASE_URL")?,
            client_id: required("SIGNLOAD_CLIENT_ID")?,
            client_secret: required("SIGNLOAD_CLIENT_SECRET")?,
            username: get("SIGNLOAD_USERNAME").unwrap_or_default(),
            password: get("SIGNLOAD_PASSWORD").unwrap_or_default(),
            otp_pin: get("SIGNLOAD_OTP_PIN").unwrap_or_default(),
            pdf_path: get("SIGNLOAD_PDF_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("sample.pdf")),
            number_of_uploads: parse_or(&get, "SIGNLOAD_NUMBER_OF_UPLOADS", 1u32)?.max(1),
            sign_per_doc: parse_or(&get, "SIGNLOAD_SIGN_PER_DOC", 1u32)?.max(1),
            request_timeout: Duration::from_secs(parse_or(
                &get,
                "SIGNLOAD_REQUEST_TIMEOUT_SECS",
                30u64,
            )?),
            poll_interval: Duration::from_millis(parse_or(
                &get,
                "SIGNLOAD_POLL_INTERVAL_MS",
                1000u64,
            )?),
            max_status_checks: parse_or(&get, "SIGNLOAD_MAX_STATUS_CHECKS", 300u32)?,
            flow,
            load,
            think_time: parse_or(&get, "SIGNLOAD_THINK_TIME", ThinkTime::None)?,
            thresholds,
            report_dir: get("SIGNLOAD_REPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("reports")),
            capture_responses: get("SIGNLOAD_CAPTURE_RESPONSES")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(false),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check the user credentials the selected flow needs
    ///
    /// The username is the signer in every variant; password and OTP pin are
    /// only used by the full flow. Re-run after changing `flow`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut needed = vec![("SIGNLOAD_USERNAME", &self.username)];
        if self.flow == FlowVariant::Full {
            needed.push(("SIGNLOAD_PASSWORD", &self.password));
            needed.push(("SIGNLOAD_OTP_PIN", &self.otp_pin));
        }
        match needed.into_iter().find(|(_, value)| value.trim().is_empty()) {
            Some((var, _)) => Err(ConfigError::Missing(var)),
            None => Ok(()),
        }
    }

    /// Read the document every upload attaches
    pub fn load_document(&self) -> Result<FileAttachment, ConfigError> {
        let bytes = std::fs::read(&self.pdf_path).map_err(|source| ConfigError::Document {
            path: self.pdf_path.clone(),
            source,
        })?;
        Ok(FileAttachment::new(bytes, file_name(&self.pdf_path)).with_content_type("application/pdf"))
    }

    /// Everything the signing steps need, with `document` attached
    pub fn signing_config(&self, document: FileAttachment) -> Arc<SigningConfig> {
        Arc::new(SigningConfig {
            base_url: self.base_url.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            otp_pin: self.otp_pin.clone(),
            document,
            number_of_uploads: self.number_of_uploads,
            sign_per_doc: self.sign_per_doc,
            placement: SignaturePlacement::default(),
            signature_image: DEFAULT_SIGNATURE_IMAGE.to_string(),
            poll_interval: self.poll_interval,
            max_status_checks: self.max_status_checks,
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string())
}

fn parse_opt<T>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get(var)
        .map(|value| {
            value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            })
        })
        .transpose()
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_opt(get, var)?.unwrap_or(default))
}

fn duration_opt(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    get(var)
        .map(|value| {
            humantime::parse_duration(value.trim()).map_err(|e| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            })
        })
        .transpose()
}
