use validator::Validate;

use crate::error::Result;

/// Runs the derived validators and hands the value back on success.
pub fn validated<T: Validate>(value: T) -> Result<T> {
    value.validate()?;
    Ok(value)
}

/// Normalizes a Telegram username for storage: trimmed, no leading `@`.
pub fn normalize_telegram_username(raw: &str) -> Option<String> {
    let handle = raw.trim().trim_start_matches('@');
    if handle.is_empty() {
        None
    } else {
        Some(handle.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_at_sign_and_blanks() {
        assert_eq!(normalize_telegram_username(" @olena_k "), Some("olena_k".into()));
        assert_eq!(normalize_telegram_username("@"), None);
    }
}
