//! Inline-button payloads. Everything the bot puts into `callback_data`
//! goes through [`CallbackPayload::encode`] and comes back through
//! [`CallbackPayload::decode`].

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use uuid::Uuid;

use crate::dto::telegram_dto::InlineKeyboardButton;

/// Telegram rejects `callback_data` longer than this.
pub const MAX_CALLBACK_BYTES: usize = 64;

const VERSION: &str = "v1";
const LEGACY_FEEDBACK_PREFIX: &str = "feedback_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackRating {
    Easy,
    Ok,
    Hard,
    VeryHard,
}

impl FeedbackRating {
    pub const ALL: [FeedbackRating; 4] = [
        FeedbackRating::Easy,
        FeedbackRating::Ok,
        FeedbackRating::Hard,
        FeedbackRating::VeryHard,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            FeedbackRating::Easy => "easy",
            FeedbackRating::Ok => "ok",
            FeedbackRating::Hard => "hard",
            FeedbackRating::VeryHard => "very_hard",
        }
    }

    /// Label shown on the button and stored on the candidate.
    pub fn label(&self) -> &'static str {
        match self {
            FeedbackRating::Easy => "Легко",
            FeedbackRating::Ok => "Нормально",
            FeedbackRating::Hard => "Складно",
            FeedbackRating::VeryHard => "Дуже складно",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.code() == code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackPayload {
    Feedback {
        rating: FeedbackRating,
        candidate_id: Uuid,
    },
    OutreachReply {
        interested: bool,
        candidate_id: Uuid,
        request_id: Uuid,
    },
}

fn pack(id: Uuid) -> String {
    URL_SAFE_NO_PAD.encode(id.as_bytes())
}

fn unpack(s: &str) -> Option<Uuid> {
    let bytes = URL_SAFE_NO_PAD.decode(s).ok()?;
    Uuid::from_slice(&bytes).ok()
}

impl CallbackPayload {
    pub fn encode(&self) -> String {
        match self {
            CallbackPayload::Feedback {
                rating,
                candidate_id,
            } => format!("{}:fb:{}:{}", VERSION, rating.code(), pack(*candidate_id)),
            CallbackPayload::OutreachReply {
                interested,
                candidate_id,
                request_id,
            } => format!(
                "{}:or:{}:{}:{}",
                VERSION,
                if *interested { "y" } else { "n" },
                pack(*candidate_id),
                pack(*request_id)
            ),
        }
    }

    /// `None` for anything that is not a payload this bot produced.
    pub fn decode(data: &str) -> Option<Self> {
        if let Some(rest) = data.strip_prefix(LEGACY_FEEDBACK_PREFIX) {
            return Self::decode_legacy_feedback(rest);
        }

        let mut parts = data.split(':');
        if parts.next()? != VERSION {
            return None;
        }
        let payload = match (parts.next()?, parts.next()?) {
            ("fb", rating) => CallbackPayload::Feedback {
                rating: FeedbackRating::from_code(rating)?,
                candidate_id: unpack(parts.next()?)?,
            },
            ("or", answer) => CallbackPayload::OutreachReply {
                interested: match answer {
                    "y" => true,
                    "n" => false,
                    _ => return None,
                },
                candidate_id: unpack(parts.next()?)?,
                request_id: unpack(parts.next()?)?,
            },
            _ => return None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(payload)
    }

    /// `feedback_<rating>_<uuid>` as sent by older keyboards.
    fn decode_legacy_feedback(rest: &str) -> Option<Self> {
        FeedbackRating::ALL.into_iter().find_map(|rating| {
            let id = rest.strip_prefix(rating.code())?.strip_prefix('_')?;
            Some(CallbackPayload::Feedback {
                rating,
                candidate_id: Uuid::parse_str(id).ok()?,
            })
        })
    }

    pub fn button(&self, text: impl Into<String>) -> InlineKeyboardButton {
        InlineKeyboardButton {
            text: text.into(),
            callback_data: self.encode(),
        }
    }
}
