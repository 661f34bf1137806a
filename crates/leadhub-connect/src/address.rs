use crate::error::ConnectError;

const MIN_PHONE_DIGITS: usize = 8;
const MAX_PHONE_DIGITS: usize = 15;
const MAX_USERNAME_LEN: usize = 30;

/// Normalise a WhatsApp phone number to `+<digits>`: drop formatting
/// characters and an optional leading `+`, require 8-15 digits (E.164 upper
/// bound). Every spelling of a number maps to the same key.
pub fn normalize_phone(raw: &str) -> Result<String, ConnectError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConnectError::InvalidInput("phone number is required".into()));
    }

    let rest = trimmed.strip_prefix('+').unwrap_or(trimmed);

    let mut digits = String::with_capacity(rest.len());
    for c in rest.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '(' | ')' | '.' => {}
            other => {
                return Err(ConnectError::InvalidInput(format!(
                    "phone number contains invalid character '{}'",
                    other
                )));
            }
        }
    }

    if !(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits.len()) {
        return Err(ConnectError::InvalidInput(format!(
            "phone number must have {} to {} digits",
            MIN_PHONE_DIGITS, MAX_PHONE_DIGITS
        )));
    }

    Ok(format!("+{}", digits))
}

/// Normalise an Instagram handle: strip a leading `@`, lowercase, allow
/// letters, digits, `.` and `_` up to 30 characters.
pub fn normalize_username(raw: &str) -> Result<String, ConnectError> {
    let handle = raw.trim();
    let handle = handle.strip_prefix('@').unwrap_or(handle);

    if handle.is_empty() {
        return Err(ConnectError::InvalidInput("username is required".into()));
    }
    if handle.chars().count() > MAX_USERNAME_LEN {
        return Err(ConnectError::InvalidInput(format!(
            "username must be at most {} characters",
            MAX_USERNAME_LEN
        )));
    }
    if !handle.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_') {
        return Err(ConnectError::InvalidInput(
            "username may only contain letters, digits, '.' and '_'".into(),
        ));
    }

    Ok(handle.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_formatting_is_stripped() {
        assert_eq!(normalize_phone("+55 11 99999-9999").unwrap(), "+5511999999999");
        assert_eq!(normalize_phone(" (11) 9999.9999 ").unwrap(), "+1199999999");
        assert_eq!(normalize_phone("+5511999999999").unwrap(), "+5511999999999");
        assert_eq!(normalize_phone("55 11 99999-9999").unwrap(), "+5511999999999");
    }

    #[test]
    fn bad_phones_are_rejected() {
        assert!(matches!(normalize_phone("   "), Err(ConnectError::InvalidInput(_))));
        assert!(matches!(normalize_phone("12345"), Err(ConnectError::InvalidInput(_))));
        assert!(matches!(normalize_phone("+55 11 abc"), Err(ConnectError::InvalidInput(_))));
        assert!(matches!(normalize_phone("++5511999999999"), Err(ConnectError::InvalidInput(_))));
    }

    #[test]
    fn usernames() {
        assert_eq!(normalize_username("@Loja.Oficial_").unwrap(), "loja.oficial_");
        assert!(normalize_username("@").is_err());
        assert!(normalize_username("has space").is_err());
        assert!(normalize_username(&"a".repeat(31)).is_err());
    }
}
