//! Shared input validation.
//!
//! Entity validators collect every problem into a [`FieldErrors`] list
//! instead of bailing on the first bad field, so a caller can surface the
//! whole form state at once.

use std::fmt::{Display, Formatter};

use validator::ValidateEmail;

use crate::error::{ErrorKind, Result};

/// Ordered list of field-level validation problems.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldErrors {
    errors: Vec<FieldError>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.errors.iter()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    /// Turns the collected list into a `Result`, erroring when non-empty.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ErrorKind::Validation(self).into())
        }
    }
}

impl Display for FieldErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (n, e) in self.errors.iter().enumerate() {
            if n > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", e.field, e.message)?;
        }
        Ok(())
    }
}

/// Requires a value of at least `min` characters, counted as chars rather
/// than bytes so accented names are not short-changed.
pub fn require_min_len(errors: &mut FieldErrors, field: &str, value: &str, min: usize) {
    if value.chars().count() < min {
        errors.push(field, format!("must be at least {} characters", min));
    }
}

pub fn require_email(errors: &mut FieldErrors, field: &str, value: &str) {
    if value.is_empty() {
        errors.push(field, "is required");
    } else if !value.validate_email() {
        errors.push(field, "is not a valid email address");
    }
}

/// Phone numbers are optional. When present they must hold 10 to 15 digits
/// after common separators are stripped, with an optional leading `+`.
pub fn check_phone(errors: &mut FieldErrors, field: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    let stripped: String = value
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    let digits = stripped.strip_prefix('+').unwrap_or(&stripped);
    let ok = (10..=15).contains(&digits.chars().count())
        && digits.chars().all(|c| c.is_ascii_digit());
    if !ok {
        errors.push(field, "is not a valid phone number");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_len_counts_chars_not_bytes() {
        let mut errors = FieldErrors::new();
        require_min_len(&mut errors, "first_name", "Aé", 2);
        assert!(errors.is_empty());

        require_min_len(&mut errors, "first_name", "A", 2);
        assert!(errors.contains("first_name"));
    }

    #[test]
    fn email_rules() {
        let mut errors = FieldErrors::new();
        require_email(&mut errors, "email", "ada@example.com");
        assert!(errors.is_empty());

        require_email(&mut errors, "email", "");
        require_email(&mut errors, "email", "not-an-email");
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn phone_accepts_separators_and_plus() {
        for ok in ["+33 6 12 34 56 78", "0612345678", "(06) 12-34-56-78", ""] {
            let mut errors = FieldErrors::new();
            check_phone(&mut errors, "phone", ok);
            assert!(errors.is_empty(), "{ok:?} should pass");
        }
    }

    #[test]
    fn phone_rejects_short_and_alphabetic() {
        for bad in ["12345", "+1234567890123456", "06 12 34 56 ab"] {
            let mut errors = FieldErrors::new();
            check_phone(&mut errors, "phone", bad);
            assert!(errors.contains("phone"), "{bad:?} should fail");
        }
    }

    #[test]
    fn into_result_errors_when_non_empty() {
        let mut errors = FieldErrors::new();
        assert!(errors.clone().into_result().is_ok());

        errors.push("name", "must be at least 3 characters");
        let err = errors.into_result().unwrap_err();
        assert!(err.to_string().contains("name: must be at least 3 characters"));
    }
}
