//! Field checks shared by the services. Each returns `AppError::BadRequest`
//! naming the offending field.

use crate::error::{AppError, AppResult};

/// Trim `value` and require its length (in chars) to be within `min..=max`.
pub fn required_text(field: &str, value: &str, min: usize, max: usize) -> AppResult<String> {
    let trimmed = value.trim();
    let len = trimmed.chars().count();
    if len == 0 {
        return Err(AppError::BadRequest(format!("{field} is required")));
    }
    if len < min || len > max {
        return Err(AppError::BadRequest(format!(
            "{field} must be between {min} and {max} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Trim an optional value; blank becomes `None`.
pub fn optional_text(field: &str, value: Option<&str>, max: usize) -> AppResult<Option<String>> {
    let Some(trimmed) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if trimmed.chars().count() > max {
        return Err(AppError::BadRequest(format!(
            "{field} cannot exceed {max} characters"
        )));
    }
    Ok(Some(trimmed.to_string()))
}

pub fn normalize_email(email: &str) -> AppResult<String> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') || email.chars().count() > 100 {
        return Err(AppError::BadRequest("Invalid email address".into()));
    }
    Ok(email)
}

pub fn non_negative(field: &str, value: i64) -> AppResult<()> {
    if value < 0 {
        return Err(AppError::BadRequest(format!("{field} cannot be negative")));
    }
    Ok(())
}

pub fn positive_quantity(quantity: i32) -> AppResult<()> {
    if quantity <= 0 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_text_trims_and_enforces_bounds() {
        assert_eq!(required_text("name", "  Shirts ", 2, 100).unwrap(), "Shirts");
        assert!(required_text("name", "   ", 2, 100).is_err());
        assert!(required_text("name", "A", 2, 100).is_err());
        assert!(required_text("name", &"x".repeat(101), 2, 100).is_err());
    }

    #[test]
    fn required_text_counts_characters_not_bytes() {
        assert!(required_text("name", "Áo Nữ", 2, 5).is_ok());
    }

    #[test]
    fn optional_text_turns_blank_into_none() {
        assert_eq!(optional_text("phone", Some("  "), 20).unwrap(), None);
        assert_eq!(optional_text("phone", None, 20).unwrap(), None);
        assert_eq!(
            optional_text("phone", Some(" 0123 "), 20).unwrap(),
            Some("0123".to_string())
        );
        assert!(optional_text("phone", Some(&"9".repeat(21)), 20).is_err());
    }

    #[test]
    fn emails_are_lowercased_and_checked() {
        assert_eq!(
            normalize_email("  Admin@Example.COM ").unwrap(),
            "admin@example.com"
        );
        assert!(normalize_email("not-an-email").is_err());
        assert!(normalize_email("").is_err());
    }

    #[test]
    fn quantities_must_be_positive() {
        assert!(positive_quantity(1).is_ok());
        assert!(positive_quantity(0).is_err());
        assert!(positive_quantity(-2).is_err());
        assert!(non_negative("price", 0).is_ok());
        assert!(non_negative("price", -1).is_err());
    }
}
