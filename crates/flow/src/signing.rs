//! Document-signing flow definitions
//!
//! Two variants of the same chain:
//!
//! - **basic**: `get_token → upload_file → request_sign`
//!   (states `TOKEN → UPLOAD → SIGNATURE`)
//! - **full**: basic, then `get_user_token → auth_otp → execute_sign →
//!   check_sign_status`
//!
//! Endpoint paths are resolved against the configured base URL.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::flow::FlowDefinition;
use crate::http::{FileAttachment, HttpRequest, HttpResponse};
use crate::step::{PollPolicy, StepDefinition, StepError};

pub const TOKEN_PATH: &str = "/auth";
pub const UPLOAD_PATH: &str = "/plus-upload";
pub const REQUEST_SIGN_PATH: &str = "/plus-requestsign";
pub const AUTH_HASH_PATH: &str = "/signing-authhashsign";
pub const EXECUTE_SIGN_PATH: &str = "/plus-executesign";
pub const CHECK_STATUS_PATH: &str = "/plus-checksignstatus";

pub const GET_TOKEN: &str = "get_token";
pub const UPLOAD_FILE: &str = "upload_file";
pub const REQUEST_SIGN: &str = "request_sign";
pub const GET_USER_TOKEN: &str = "get_user_token";
pub const AUTH_OTP: &str = "auth_otp";
pub const EXECUTE_SIGN: &str = "execute_sign";
pub const CHECK_SIGN_STATUS: &str = "check_sign_status";

/// 1x1 transparent PNG used as the visible signature
pub const DEFAULT_SIGNATURE_IMAGE: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNk+A8AAQUBAScY42YAAAAASUVORK5CYII=";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowVariant {
    #[default]
    Basic,
    Full,
}

impl FromStr for FlowVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "basic" => Ok(FlowVariant::Basic),
            "full" => Ok(FlowVariant::Full),
            other => Err(format!("unknown flow '{}', use 'basic' or 'full'", other)),
        }
    }
}

impl fmt::Display for FlowVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowVariant::Basic => write!(f, "basic"),
            FlowVariant::Full => write!(f, "full"),
        }
    }
}

/// Where the visible signature goes on each page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignaturePlacement {
    pub coordinate_x: i64,
    pub coordinate_y: i64,
    pub width: u32,
    pub height: u32,
    pub page_number: u32,
}

impl Default for SignaturePlacement {
    fn default() -> Self {
        Self {
            coordinate_x: 0,
            coordinate_y: 0,
            width: 200,
            height: 100,
            page_number: 1,
        }
    }
}

/// Everything the signing steps need to build their requests
#[derive(Debug, Clone)]
pub struct SigningConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub otp_pin: String,
    pub document: FileAttachment,
    pub number_of_uploads: u32,
    pub sign_per_doc: u32,
    pub placement: SignaturePlacement,
    pub signature_image: String,
    pub poll_interval: Duration,
    pub max_status_checks: u32,
}

impl SigningConfig {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// `request_sign` payload for the files uploaded so far
    pub fn sign_request_payload(&self, request_id: &str, user: &str, files: &[String]) -> Value {
        let placement = &self.placement;
        let list_pdf: Vec<Value> = files
            .iter()
            .map(|filename| {
                let signatures: Vec<Value> = (0..self.sign_per_doc)
                    .map(|_| {
                        json!({
                            "user_identifier": user,
                            "width": placement.width,
                            "height": placement.height,
                            "coordinate_x": placement.coordinate_x,
                            "coordinate_y": placement.coordinate_y,
                            "page_number": placement.page_number,
                        })
                    })
                    .collect();
                json!({ "filename": filename, "signatures": signatures })
            })
            .collect();

        json!({
            "request_id": request_id,
            "signatures": [{
                "user_identifier": user,
                "signature_image": self.signature_image,
                "sequence": 1,
            }],
            "list_pdf": list_pdf,
        })
    }
}

/// Build the flow definition for `variant`
pub fn flow_for(variant: FlowVariant, config: Arc<SigningConfig>) -> FlowDefinition {
    match variant {
        FlowVariant::Basic => basic_flow(config),
        FlowVariant::Full => full_flow(config),
    }
}

pub fn basic_flow(config: Arc<SigningConfig>) -> FlowDefinition {
    FlowDefinition::new(
        "basic",
        vec![
            get_token_step(config.clone()),
            upload_file_step(config.clone()),
            request_sign_step(config.clone()),
        ],
    )
    .with_auth_step(GET_TOKEN)
    .with_user_identifier(config.username.clone())
}

pub fn full_flow(config: Arc<SigningConfig>) -> FlowDefinition {
    FlowDefinition::new(
        "full",
        vec![
            get_token_step(config.clone()),
            upload_file_step(config.clone()),
            request_sign_step(config.clone()),
            get_user_token_step(config.clone()),
            auth_otp_step(config.clone()),
            execute_sign_step(config.clone()),
            check_sign_status_step(config.clone()),
        ],
    )
    .with_auth_step(GET_TOKEN)
    .with_user_identifier(config.username.clone())
}

fn has_access_token(response: &HttpResponse) -> bool {
    response.status == 200 && response.str_at("access_token").is_some()
}

fn access_token(response: &HttpResponse) -> Result<String, StepError> {
    response
        .str_at("access_token")
        .map(str::to_string)
        .ok_or_else(|| StepError::Extraction("access_token".to_string()))
}

pub fn get_token_step(config: Arc<SigningConfig>) -> StepDefinition {
    StepDefinition::new(GET_TOKEN, move |_| {
        Ok(HttpRequest::post(config.url(TOKEN_PATH)).form([
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("grant_type", "client_credentials"),
        ]))
    })
    .with_state("TOKEN")
    .with_success_predicate(has_access_token)
    .on_success(|ctx, response| {
        ctx.auth_token = Some(access_token(response)?);
        Ok(())
    })
}

pub fn upload_file_step(config: Arc<SigningConfig>) -> StepDefinition {
    let repeat = config.number_of_uploads;
    StepDefinition::new(UPLOAD_FILE, move |ctx| {
        Ok(HttpRequest::post(config.url(UPLOAD_PATH))
            .bearer(ctx.require_auth_token()?)
            .multipart("file", config.document.clone()))
    })
    .with_state("UPLOAD")
    .with_repeat(repeat)
    .with_success_predicate(|r| r.status == 200 && r.str_at("filename").is_some())
    .on_success(|ctx, response| {
        let filename = response
            .str_at("filename")
            .ok_or_else(|| StepError::Extraction("filename".to_string()))?;
        ctx.uploaded_files.push(filename.to_string());
        Ok(())
    })
    .refresh_on_unauthorized()
}

/// `id` query parameter of the first authorization URL
pub fn signing_id(response: &HttpResponse) -> Option<String> {
    let url = response.str_at("auth_urls.0.url")?;
    let (_, query) = url.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "id")
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

pub fn request_sign_step(config: Arc<SigningConfig>) -> StepDefinition {
    StepDefinition::new(REQUEST_SIGN, move |ctx| {
        if ctx.uploaded_files.is_empty() {
            return Err(StepError::MissingContext("uploaded_files"));
        }
        let payload = config.sign_request_payload(
            ctx.require_request_id()?,
            ctx.require_user_identifier()?,
            &ctx.uploaded_files,
        );
        Ok(HttpRequest::post(config.url(REQUEST_SIGN_PATH))
            .bearer(ctx.require_auth_token()?)
            .json(payload))
    })
    .with_state("SIGNATURE")
    .with_success_predicate(|r| r.status == 200 && signing_id(r).is_some())
    .on_success(|ctx, response| {
        ctx.signing_id =
            Some(signing_id(response).ok_or_else(|| StepError::Extraction("auth_urls".into()))?);
        Ok(())
    })
    .refresh_on_unauthorized()
}

pub fn get_user_token_step(config: Arc<SigningConfig>) -> StepDefinition {
    StepDefinition::new(GET_USER_TOKEN, move |_| {
        Ok(HttpRequest::post(config.url(TOKEN_PATH)).form([
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("grant_type", "password"),
            ("username", config.username.as_str()),
            ("password", config.password.as_str()),
        ]))
    })
    .with_state("USER_TOKEN")
    .with_success_predicate(has_access_token)
    .on_success(|ctx, response| {
        ctx.user_token = Some(access_token(response)?);
        Ok(())
    })
}

pub fn auth_otp_step(config: Arc<SigningConfig>) -> StepDefinition {
    StepDefinition::new(AUTH_OTP, move |ctx| {
        let url = format!(
            "{}?user={}&id={}&channel_id={}",
            config.url(AUTH_HASH_PATH),
            ctx.require_user_identifier()?,
            ctx.require_signing_id()?,
            config.client_id
        );
        Ok(HttpRequest::post(url)
            .bearer(ctx.require_user_token()?)
            .json(json!({ "otp_pin": config.otp_pin })))
    })
    .with_state("OTP")
}

pub fn execute_sign_step(config: Arc<SigningConfig>) -> StepDefinition {
    StepDefinition::new(EXECUTE_SIGN, move |ctx| {
        Ok(HttpRequest::post(config.url(EXECUTE_SIGN_PATH))
            .bearer(ctx.require_auth_token()?)
            .json(json!({
                "request_id": ctx.require_request_id()?,
                "user_identifier": ctx.require_user_identifier()?,
            })))
    })
    .with_state("EXECUTE")
    .refresh_on_unauthorized()
}

pub fn check_sign_status_step(config: Arc<SigningConfig>) -> StepDefinition {
    let poll = PollPolicy::new(config.poll_interval, config.max_status_checks, |r| {
        r.str_at("message") == Some("DONE")
    });
    StepDefinition::new(CHECK_SIGN_STATUS, move |ctx| {
        Ok(HttpRequest::post(config.url(CHECK_STATUS_PATH))
            .bearer(ctx.require_auth_token()?)
            .json(json!({ "request_id": ctx.require_request_id()? })))
    })
    .with_state("STATUS")
    .with_poll(poll)
}

#[cfg(test)]
pub(crate) fn test_config(base_url: &str) -> SigningConfig {
    SigningConfig {
        base_url: base_url.to_string(),
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        username: "signer".to_string(),
        password: "pw".to_string(),
        otp_pin: "123456".to_string(),
        document: FileAttachment::new(b"%PDF-1.4".to_vec(), "doc.pdf")
            .with_content_type("application/pdf"),
        number_of_uploads: 1,
        sign_per_doc: 1,
        placement: SignaturePlacement::default(),
        signature_image: DEFAULT_SIGNATURE_IMAGE.to_string(),
        poll_interval: Duration::from_millis(10),
        max_status_checks: 3,
    }
}
