//! Request records and the field validators run before any orchestrator logic.
//!
//! Records are plain data. Each exposes `validate()` which applies the field
//! checks below and returns a normalized input for the orchestrator.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::error::{AuthError, AuthResult};

const MAX_EMAIL_LENGTH: usize = 254;
const MAX_PASSWORD_LENGTH: usize = 1024;

static EMAIL_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Field must be present and not blank.
///
/// # Errors
/// `Validation` when missing or whitespace only.
pub fn required<'a>(field: &'static str, value: Option<&'a str>) -> AuthResult<&'a str> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(AuthError::validation(field, "is required")),
    }
}

/// Required, well-formed email. Returns the normalized address.
///
/// # Errors
/// `Validation` when missing, too long or malformed.
pub fn email(field: &'static str, value: Option<&str>) -> AuthResult<String> {
    let normalized = normalize_email(required(field, value)?);
    if normalized.len() > MAX_EMAIL_LENGTH {
        return Err(AuthError::validation(field, "is too long"));
    }
    let valid = EMAIL_RE
        .as_ref()
        .is_some_and(|regex| regex.is_match(&normalized));
    if valid {
        Ok(normalized)
    } else {
        Err(AuthError::validation(field, "is not a valid email address"))
    }
}

/// Required password. Not trimmed: whitespace is significant.
///
/// # Errors
/// `Validation` when missing or unreasonably long.
pub fn password<'a>(field: &'static str, value: Option<&'a str>) -> AuthResult<&'a str> {
    let value = required(field, value)?;
    if value.len() > MAX_PASSWORD_LENGTH {
        return Err(AuthError::validation(field, "is too long"));
    }
    Ok(value)
}

/// `value` must equal the field it confirms.
///
/// # Errors
/// `Validation` on `field` when missing or different.
pub fn matches(field: &'static str, value: Option<&str>, other: &str) -> AuthResult<()> {
    if value == Some(other) {
        Ok(())
    } else {
        Err(AuthError::validation(field, "does not match"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenWithPassword {
    pub token: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default, Clone)]
pub struct RegisterRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub password_confirmation: Option<String>,
}

impl RegisterRequest {
    /// # Errors
    /// First failing field check.
    pub fn validate(&self) -> AuthResult<NewAccount> {
        let email = email("email", self.email.as_deref())?;
        let password = password("password", self.password.as_deref())?;
        matches(
            "password_confirmation",
            self.password_confirmation.as_deref(),
            password,
        )?;
        Ok(NewAccount {
            email,
            password: password.to_string(),
        })
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default, Clone)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

impl LoginRequest {
    /// # Errors
    /// First failing field check.
    pub fn validate(&self) -> AuthResult<Credentials> {
        let email = email("email", self.email.as_deref())?;
        let password = password("password", self.password.as_deref())?;
        Ok(Credentials {
            email,
            password: password.to_string(),
        })
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default, Clone)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

impl RefreshRequest {
    /// # Errors
    /// `Validation` when the token is missing.
    pub fn validate(&self) -> AuthResult<String> {
        required("refresh_token", self.refresh_token.as_deref()).map(|t| t.trim().to_string())
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default, Clone)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub everywhere: bool,
}

impl LogoutRequest {
    /// # Errors
    /// `Validation` when the token is missing.
    pub fn validate(&self) -> AuthResult<String> {
        required("refresh_token", self.refresh_token.as_deref()).map(|t| t.trim().to_string())
    }
}

/// Body shared by password reset requests and verification resends.
#[derive(ToSchema, Serialize, Deserialize, Debug, Default, Clone)]
pub struct EmailRequest {
    pub email: Option<String>,
}

impl EmailRequest {
    /// # Errors
    /// `Validation` when the email is missing or malformed.
    pub fn validate(&self) -> AuthResult<String> {
        email("email", self.email.as_deref())
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default, Clone)]
pub struct PasswordResetRequest {
    pub token: Option<String>,
    pub password: Option<String>,
    pub password_confirmation: Option<String>,
}

impl PasswordResetRequest {
    /// # Errors
    /// First failing field check.
    pub fn validate(&self) -> AuthResult<TokenWithPassword> {
        token_with_password(
            self.token.as_deref(),
            self.password.as_deref(),
            self.password_confirmation.as_deref(),
        )
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default, Clone)]
pub struct InviteRequest {
    pub email: Option<String>,
    /// Roles granted on acceptance; defaults to `ROLE_USER`.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl InviteRequest {
    /// # Errors
    /// `Validation` when the email is missing or malformed.
    pub fn validate(&self) -> AuthResult<String> {
        email("email", self.email.as_deref())
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default, Clone)]
pub struct InviteCompleteRequest {
    pub token: Option<String>,
    pub password: Option<String>,
    pub password_confirmation: Option<String>,
}

impl InviteCompleteRequest {
    /// # Errors
    /// First failing field check.
    pub fn validate(&self) -> AuthResult<TokenWithPassword> {
        token_with_password(
            self.token.as_deref(),
            self.password.as_deref(),
            self.password_confirmation.as_deref(),
        )
    }
}

#[derive(Deserialize, IntoParams, Debug, Default, Clone)]
#[into_params(parameter_in = Query)]
pub struct VerifyEmailQuery {
    pub token: Option<String>,
}

impl VerifyEmailQuery {
    /// # Errors
    /// `Validation` when the token is missing.
    pub fn validate(&self) -> AuthResult<String> {
        required("token", self.token.as_deref()).map(|t| t.trim().to_string())
    }
}

fn token_with_password(
    token: Option<&str>,
    new_password: Option<&str>,
    confirmation: Option<&str>,
) -> AuthResult<TokenWithPassword> {
    let token = required("token", token)?.trim().to_string();
    let new_password = password("password", new_password)?;
    matches("password_confirmation", confirmation, new_password)?;
    Ok(TokenWithPassword {
        token,
        password: new_password.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(err: AuthError) -> &'static str {
        match err {
            AuthError::Validation { field, .. } => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn required_rejects_blank() {
        assert!(required("x", None).is_err());
        assert!(required("x", Some("   ")).is_err());
        assert_eq!(required("x", Some("v")).ok(), Some("v"));
    }

    #[test]
    fn email_is_normalized_and_checked() {
        assert_eq!(
            email("email", Some("  Alice@Example.COM ")).ok(),
            Some("alice@example.com".to_string())
        );
        assert!(email("email", Some("not-an-email")).is_err());
        assert!(email("email", Some("a@b")).is_err());
        let long = format!("{}@example.com", "a".repeat(250));
        assert!(email("email", Some(&long)).is_err());
    }

    #[test]
    fn password_keeps_whitespace() {
        assert_eq!(password("password", Some(" pw ")).ok(), Some(" pw "));
    }

    #[test]
    fn register_requires_matching_confirmation() {
        let request = RegisterRequest {
            email: Some("user@example.com".to_string()),
            password: Some("Password1".to_string()),
            password_confirmation: Some("Password2".to_string()),
        };
        assert_eq!(
            request.validate().map_err(field_of).err(),
            Some("password_confirmation")
        );
    }

    #[test]
    fn register_reports_first_missing_field() {
        let request = RegisterRequest::default();
        assert_eq!(request.validate().map_err(field_of).err(), Some("email"));
    }

    #[test]
    fn register_valid() -> AuthResult<()> {
        let account = RegisterRequest {
            email: Some("User@Example.com".to_string()),
            password: Some("Password1".to_string()),
            password_confirmation: Some("Password1".to_string()),
        }
        .validate()?;
        assert_eq!(account.email, "user@example.com");
        assert_eq!(account.password, "Password1");
        Ok(())
    }

    #[test]
    fn reset_requires_token() {
        let request = PasswordResetRequest {
            token: None,
            password: Some("Password1".to_string()),
            password_confirmation: Some("Password1".to_string()),
        };
        assert_eq!(request.validate().map_err(field_of).err(), Some("token"));
    }

    #[test]
    fn logout_defaults_to_single_session() -> anyhow::Result<()> {
        let request: LogoutRequest = serde_json::from_str(r#"{"refresh_token":"abc"}"#)?;
        assert!(!request.everywhere);
        assert_eq!(request.validate()?, "abc");
        Ok(())
    }
}
