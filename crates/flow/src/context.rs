//! Per-iteration flow state

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::step::StepError;

/// State carried between the steps of one iteration
///
/// Created when the iteration starts, owned by it alone, dropped once the
/// outcome has been recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowContext {
    pub iteration: u64,
    /// Business request id shared by all signing calls of this flow
    pub request_id: Option<String>,
    pub user_identifier: Option<String>,
    /// Client-credentials bearer token
    pub auth_token: Option<String>,
    /// Password-grant token of the signing user
    pub user_token: Option<String>,
    pub uploaded_files: Vec<String>,
    /// `id` parameter of the signing authorization URL
    pub signing_id: Option<String>,
    flags: Vec<(String, bool)>,
}

impl FlowContext {
    /// Fresh context with every step flag cleared and a new request id
    pub fn new<S: AsRef<str>>(iteration: u64, steps: &[S]) -> Self {
        Self {
            iteration,
            request_id: Some(random_id(6)),
            user_identifier: None,
            auth_token: None,
            user_token: None,
            uploaded_files: Vec::new(),
            signing_id: None,
            flags: steps
                .iter()
                .map(|s| (s.as_ref().to_string(), false))
                .collect(),
        }
    }

    pub fn with_user_identifier(mut self, user: Option<String>) -> Self {
        self.user_identifier = user;
        self
    }

    /// Most recently uploaded file name
    pub fn uploaded_file_name(&self) -> Option<&str> {
        self.uploaded_files.last().map(String::as_str)
    }

    pub fn mark(&mut self, step: &str, ok: bool) {
        if let Some(flag) = self.flags.iter_mut().find(|(name, _)| name == step) {
            flag.1 = ok;
        }
    }

    pub fn flag(&self, step: &str) -> bool {
        self.flags
            .iter()
            .any(|(name, ok)| name == step && *ok)
    }

    pub fn flags(&self) -> &[(String, bool)] {
        &self.flags
    }

    pub fn into_flags(self) -> Vec<(String, bool)> {
        self.flags
    }

    pub fn require_auth_token(&self) -> Result<&str, StepError> {
        self.auth_token
            .as_deref()
            .ok_or(StepError::MissingContext("auth_token"))
    }

    pub fn require_user_token(&self) -> Result<&str, StepError> {
        self.user_token
            .as_deref()
            .ok_or(StepError::MissingContext("user_token"))
    }

    pub fn require_request_id(&self) -> Result<&str, StepError> {
        self.request_id
            .as_deref()
            .ok_or(StepError::MissingContext("request_id"))
    }

    /// Signer every request acts for; a blank identifier counts as missing
    pub fn require_user_identifier(&self) -> Result<&str, StepError> {
        self.user_identifier
            .as_deref()
            .filter(|user| !user.trim().is_empty())
            .ok_or(StepError::MissingContext("user_identifier"))
    }

    pub fn require_signing_id(&self) -> Result<&str, StepError> {
        self.signing_id
            .as_deref()
            .ok_or(StepError::MissingContext("signing_id"))
    }
}

/// Lowercase alphanumeric id of `len` characters
pub fn random_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_has_cleared_flags() {
        let ctx = FlowContext::new(3, &["get_token", "upload_file"]);
        assert_eq!(ctx.iteration, 3);
        assert!(!ctx.flag("get_token"));
        assert!(!ctx.flag("upload_file"));
        assert_eq!(ctx.request_id.as_deref().map(str::len), Some(6));
        assert!(ctx.uploaded_file_name().is_none());
    }

    #[test]
    fn test_mark_unknown_step_is_ignored() {
        let mut ctx = FlowContext::new(0, &["get_token"]);
        ctx.mark("nope", true);
        ctx.mark("get_token", true);
        assert_eq!(ctx.flags(), &[("get_token".to_string(), true)]);
    }

    #[test]
    fn test_random_id_charset() {
        let id = random_id(32);
        assert_eq!(id.len(), 32);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_missing_token_is_an_error() {
        let ctx = FlowContext::new(0, &["get_token"]);
        assert_eq!(
            ctx.require_auth_token(),
            Err(StepError::MissingContext("auth_token"))
        );
    }

    #[test]
    fn test_blank_user_identifier_is_missing() {
        let ctx = FlowContext::new(0, &["request_sign"]).with_user_identifier(Some(String::new()));
        assert_eq!(
            ctx.require_user_identifier(),
            Err(StepError::MissingContext("user_identifier"))
        );

        let ctx = ctx.with_user_identifier(Some("signer".to_string()));
        assert_eq!(ctx.require_user_identifier(), Ok("signer"));
    }
}
