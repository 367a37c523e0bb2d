use std::sync::OnceLock;

use regex::Regex;

use crate::error::{AppError, Result};

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("email regex")
    })
}

/// Validates an email address.
///
/// # Arguments
///
/// * `email` - The email address to validate.
///
/// # Returns
///
/// A `Result<()>` indicating whether the email is valid.
pub fn validate_email(email: &str) -> Result<()> {
    if email.is_empty() {
        return Err(AppError::Validation("Email is required".to_string()));
    }

    if email.len() > 255 {
        return Err(AppError::Validation(
            "Email must be at most 255 characters".to_string(),
        ));
    }

    if !email_regex().is_match(email) {
        return Err(AppError::Validation("Invalid email format".to_string()));
    }

    Ok(())
}

/// Validates a password.
///
/// # Arguments
///
/// * `password` - The password to validate.
///
/// # Returns
///
/// A `Result<()>` indicating whether the password is valid.
pub fn validate_password(password: &str) -> Result<()> {
    if password.len() < 8 {
        return Err(AppError::Validation(
            "Password must be at least 8 characters long".to_string(),
        ));
    }

    if password.len() > 128 {
        return Err(AppError::Validation(
            "Password must be at most 128 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validates a person's display name.
///
/// # Arguments
///
/// * `name` - The name to validate.
///
/// # Returns
///
/// A `Result<()>` indicating whether the name is valid.
pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(AppError::Validation("Name is required".to_string()));
    }

    if name.len() > 255 {
        return Err(AppError::Validation(
            "Name must be at most 255 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validates a national identifier (RUT-style, digits plus check character).
///
/// # Arguments
///
/// * `national_id` - The identifier to validate.
///
/// # Returns
///
/// A `Result<()>` indicating whether the identifier is valid.
pub fn validate_national_id(national_id: &str) -> Result<()> {
    if national_id.is_empty() {
        return Err(AppError::Validation("National id is required".to_string()));
    }

    if national_id.len() > 20 {
        return Err(AppError::Validation(
            "National id must be at most 20 characters".to_string(),
        ));
    }

    if !national_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
    {
        return Err(AppError::Validation(
            "National id can only contain letters, numbers, dots, and hyphens".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_emails() {
        assert!(validate_email("ana.rojas@uchile.cl").is_ok());
        assert!(validate_email("a+b@example.org").is_ok());
    }

    #[test]
    fn rejects_malformed_emails() {
        assert!(validate_email("").is_err());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("missing@tld").is_err());
        assert!(validate_email("two@@example.cl").is_err());
    }

    #[test]
    fn password_length_bounds() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("long-enough-pass").is_ok());
        assert!(validate_password(&"x".repeat(129)).is_err());
    }

    #[test]
    fn national_id_charset() {
        assert!(validate_national_id("12.345.678-9").is_ok());
        assert!(validate_national_id("12345678-K").is_ok());
        assert!(validate_national_id("12 345 678").is_err());
        assert!(validate_national_id("").is_err());
    }
}
