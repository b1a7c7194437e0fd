//! Inline input checks. Failures never reach the network.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ClientError, Result};

static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9]{10,15}$").expect("valid phone pattern"));
static OTP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{6}$").expect("valid otp pattern"));
static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email pattern"));
static SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s\-().]").expect("valid separator pattern"));

pub const PASSWORD_MIN_LENGTH: usize = 8;

/// Normalizes a phone number (drops separators) and checks its shape.
pub fn phone(raw: &str) -> Result<String> {
    let normalized = SEPARATORS.replace_all(raw.trim(), "").into_owned();
    if normalized.is_empty() {
        return Err(ClientError::validation("phone", "Phone number is required"));
    }
    if !PHONE.is_match(&normalized) {
        return Err(ClientError::validation("phone", "Invalid phone number"));
    }
    Ok(normalized)
}

pub fn otp(raw: &str) -> Result<String> {
    let code = raw.trim();
    if !OTP.is_match(code) {
        return Err(ClientError::validation("otp", "Enter the 6-digit code"));
    }
    Ok(code.to_string())
}

pub fn email(raw: &str) -> Result<String> {
    let email = raw.trim();
    if !EMAIL.is_match(email) {
        return Err(ClientError::validation("email", "Invalid email address"));
    }
    Ok(email.to_string())
}

/// At least eight characters with upper case, lower case and a digit.
pub fn password(raw: &str) -> Result<()> {
    let strong = raw.chars().count() >= PASSWORD_MIN_LENGTH
        && raw.chars().any(|c| c.is_ascii_uppercase())
        && raw.chars().any(|c| c.is_ascii_lowercase())
        && raw.chars().any(|c| c.is_ascii_digit());
    if !strong {
        return Err(ClientError::validation(
            "password",
            "Password must be at least 8 characters with uppercase, lowercase, and number",
        ));
    }
    Ok(())
}

pub fn message_body(raw: &str) -> Result<String> {
    let body = raw.trim();
    if body.is_empty() {
        return Err(ClientError::validation("body", "Message cannot be empty"));
    }
    Ok(body.to_string())
}
