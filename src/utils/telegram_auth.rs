use subtle::ConstantTimeEq;

/// Header Telegram echoes back when the webhook was registered with a secret.
pub const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Constant-time comparison of a presented shared secret.
/// With no secret configured every request is accepted.
pub fn verify_secret(expected: Option<&str>, presented: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    let Some(presented) = presented else {
        return false;
    };
    let a = expected.as_bytes();
    let b = presented.as_bytes();
    a.len() == b.len() && bool::from(a.ct_eq(b))
}
