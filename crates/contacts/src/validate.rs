//! Field validation and normalisation for contact input.

use std::sync::LazyLock;

use regex::Regex;

use crate::{Error, Result, types::NewContact};

const MAX_NAME_LEN: usize = 100;
const MAX_EMAIL_LEN: usize = 254;

static EMAIL_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]{2,}$").ok());

/// Validate a registration form. All three fields are required.
pub fn validate_registration(name: &str, phone: &str, email: &str) -> Result<NewContact> {
    if name.trim().is_empty() || phone.trim().is_empty() || email.trim().is_empty() {
        return Err(Error::invalid("form", "All fields are required"));
    }
    Ok(NewContact {
        name: normalize_name(name)?,
        phone: normalize_phone(phone)?,
        email: normalize_email(email)?,
    })
}

pub fn normalize_name(raw: &str) -> Result<String> {
    let name = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if name.is_empty() {
        return Err(Error::invalid("name", "Name is required"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(Error::invalid(
            "name",
            format!("Name must be at most {MAX_NAME_LEN} characters"),
        ));
    }
    if name.chars().any(char::is_control) {
        return Err(Error::invalid("name", "Name contains invalid characters"));
    }
    Ok(name)
}

/// Reduce a phone number to international digits (`+44 20-7946 0958` →
/// `442079460958`).
///
/// The country code is required: numbers written in national format with a
/// leading `0` are rejected rather than guessed.
pub fn normalize_phone(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let without_prefix = trimmed
        .strip_prefix('+')
        .or_else(|| trimmed.strip_prefix("00"))
        .unwrap_or(trimmed);

    let mut digits = String::with_capacity(without_prefix.len());
    for c in without_prefix.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '(' | ')' | '.' => {},
            _ => {
                return Err(Error::invalid(
                    "phone",
                    "Phone number may only contain digits",
                ));
            },
        }
    }

    if digits.starts_with('0') {
        return Err(Error::invalid(
            "phone",
            "Phone number must include the country code",
        ));
    }
    if !(7..=15).contains(&digits.len()) {
        return Err(Error::invalid(
            "phone",
            "Phone number must have between 7 and 15 digits",
        ));
    }
    Ok(digits)
}

pub fn normalize_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_lowercase();
    let valid = email.len() <= MAX_EMAIL_LEN
        && EMAIL_RE
            .as_ref()
            .is_some_and(|re| re.is_match(&email));
    if !valid {
        return Err(Error::invalid("email", "Email address is not valid"));
    }
    Ok(email)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("+234 801 234 5678", "2348012345678")]
    #[case("00491511234567", "491511234567")]
    #[case("(1) 415-555.0100", "14155550100")]
    #[case("  447700900123 ", "447700900123")]
    fn normalizes_phone(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_phone(raw).unwrap(), expected);
    }

    #[rstest]
    #[case("08012345678")]
    #[case("+1 555")]
    #[case("12345678901234567")]
    #[case("+234 801 CALL ME")]
    fn rejects_bad_phone(#[case] raw: &str) {
        assert!(matches!(
            normalize_phone(raw),
            Err(Error::Invalid { field: "phone", .. })
        ));
    }

    #[rstest]
    #[case("Ada@Example.ORG ", "ada@example.org")]
    #[case("first.last+tag@mail.co.uk", "first.last+tag@mail.co.uk")]
    fn normalizes_email(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_email(raw).unwrap(), expected);
    }

    #[rstest]
    #[case("no-at-sign.example.org")]
    #[case("two@@example.org")]
    #[case("spaces in@example.org")]
    #[case("user@localhost")]
    fn rejects_bad_email(#[case] raw: &str) {
        assert!(normalize_email(raw).is_err());
    }

    #[test]
    fn collapses_whitespace_in_names() {
        assert_eq!(normalize_name("  Ada \t Lovelace ").unwrap(), "Ada Lovelace");
        assert!(normalize_name(&"x".repeat(101)).is_err());
    }

    #[test]
    fn missing_fields_are_reported_together() {
        let err = validate_registration("Ada", "", "ada@example.org").unwrap_err();
        assert_eq!(err.to_string(), "All fields are required");
    }

    #[test]
    fn valid_registration() {
        let c = validate_registration(" Ada ", "+2348012345678", "ADA@example.org").unwrap();
        assert_eq!(c.name, "Ada");
        assert_eq!(c.phone, "2348012345678");
        assert_eq!(c.email, "ada@example.org");
    }
}
