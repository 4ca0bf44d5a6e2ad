//! Input rules checked on the client before any request is issued.

use thiserror::Error;

pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 32;
pub const PASSWORD_MIN_LEN: usize = 6;
/// Shorter search queries return nothing.
pub const SEARCH_MIN_LEN: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("username must be at least {min} characters", min = USERNAME_MIN_LEN)]
    UsernameTooShort,

    #[error("username must be at most {max} characters", max = USERNAME_MAX_LEN)]
    UsernameTooLong,

    #[error("username may only contain letters, digits and underscores")]
    UsernameInvalid,

    #[error("password must be at least {min} characters", min = PASSWORD_MIN_LEN)]
    PasswordTooShort,

    #[error("passwords do not match")]
    PasswordMismatch,

    #[error("invalid email address")]
    InvalidEmail,

    #[error("cannot target your own account")]
    SelfTarget,
}

/// Returns the trimmed message content, rejecting blank input.
pub fn message_content(content: &str) -> Result<String, ValidationError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyMessage);
    }
    Ok(trimmed.to_string())
}

/// Returns the trimmed username.
pub fn username(input: &str) -> Result<String, ValidationError> {
    let trimmed = input.trim();
    let len = trimmed.chars().count();
    if len < USERNAME_MIN_LEN {
        return Err(ValidationError::UsernameTooShort);
    }
    if len > USERNAME_MAX_LEN {
        return Err(ValidationError::UsernameTooLong);
    }
    if !trimmed.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(ValidationError::UsernameInvalid);
    }
    Ok(trimmed.to_string())
}

pub fn password(input: &str) -> Result<(), ValidationError> {
    if input.chars().count() < PASSWORD_MIN_LEN {
        return Err(ValidationError::PasswordTooShort);
    }
    Ok(())
}

pub fn password_change(new: &str, confirm: &str) -> Result<(), ValidationError> {
    password(new)?;
    if new != confirm {
        return Err(ValidationError::PasswordMismatch);
    }
    Ok(())
}

/// Returns the trimmed, lowercased email.
pub fn email(input: &str) -> Result<String, ValidationError> {
    let trimmed = input.trim();
    match trimmed.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !domain.starts_with('.') => {
            Ok(trimmed.to_lowercase())
        }
        _ => Err(ValidationError::InvalidEmail),
    }
}

/// Returns the trimmed query when it is long enough to search for.
pub fn search_query(input: &str) -> Option<&str> {
    let trimmed = input.trim();
    (trimmed.chars().count() >= SEARCH_MIN_LEN).then_some(trimmed)
}
