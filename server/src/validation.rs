use crate::error::{AppError, Result};

const MAX_EMAIL_LEN: usize = 254;
const MAX_NAME_LEN: usize = 100;
const SLUG_LEN: std::ops::RangeInclusive<usize> = 3..=64;
pub const MAX_TRIAL_DAYS: u32 = 365;

/// Shape check only; ownership is proven by the verification email.
pub fn validate_email(email: &str) -> Result<()> {
    let email = email.trim();
    let invalid = || AppError::Validation("Invalid email address".to_string());

    if email.is_empty() || email.len() > MAX_EMAIL_LEN || email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
    {
        return Err(invalid());
    }
    Ok(())
}

/// Trims the display name; blank becomes `None`.
pub fn clean_name(name: Option<&str>) -> Result<Option<String>> {
    let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };
    if name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::Validation(format!(
            "Name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(Some(name.to_string()))
}

pub fn validate_slug(slug: &str) -> Result<()> {
    let valid = SLUG_LEN.contains(&slug.len())
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid {
        return Err(AppError::Validation(
            "Slug must be 3-64 characters of a-z, 0-9 or '-'".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_trial_days(days: u32, allow_zero: bool) -> Result<()> {
    if days > MAX_TRIAL_DAYS || (!allow_zero && days == 0) {
        let min = if allow_zero { 0 } else { 1 };
        return Err(AppError::Validation(format!(
            "Trial days must be between {min} and {MAX_TRIAL_DAYS}"
        )));
    }
    Ok(())
}
