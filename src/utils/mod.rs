pub mod ai_json;
pub mod telegram_auth;
pub mod time;
pub mod token;
pub mod validation;
