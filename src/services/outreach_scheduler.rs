//! Send-time heuristics for the first contact with a warm candidate.

use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;
use rand::Rng;
use serde_json::Value as JsonValue;

use crate::models::outreach_item::DeliveryMethod;
use crate::utils::time::local_at;

const REPLY_HOUR: u32 = 10;

/// Maps a submission instant to a human-plausible reply instant, reading
/// the clock in the company timezone:
///
/// * 07:00-14:59 local: 3 to 4 hours later, uniformly jittered in ms.
/// * 00:00-06:59 local: the same local day, 10:00-10:59.
/// * 15:00-23:59 local: the next local day, 10:00-10:59.
pub fn calculate_scheduled_time<R: Rng>(
    submission: DateTime<Utc>,
    tz: Tz,
    rng: &mut R,
) -> DateTime<Utc> {
    let local = submission.with_timezone(&tz);
    match local.hour() {
        7..=14 => {
            let jitter_ms = rng.gen_range(1..3_600_000);
            submission + Duration::hours(3) + Duration::milliseconds(jitter_ms)
        }
        0..=6 => local_at(tz, local.date_naive(), REPLY_HOUR, rng.gen_range(0..60)),
        _ => {
            let next_day = local.date_naive() + Duration::days(1);
            local_at(tz, next_day, REPLY_HOUR, rng.gen_range(0..60))
        }
    }
}

/// Telegram only when the candidate asked for it and gave a handle.
/// `preferred` may be an array, a JSON-encoded array string, or null.
pub fn determine_delivery_method(
    preferred: Option<&JsonValue>,
    telegram_handle: Option<&str>,
) -> DeliveryMethod {
    let has_handle = telegram_handle
        .map(|h| h.trim().trim_start_matches('@'))
        .is_some_and(|h| !h.is_empty());
    if has_handle && preferred_methods(preferred).iter().any(|m| m == "telegram") {
        DeliveryMethod::Telegram
    } else {
        DeliveryMethod::Email
    }
}

fn preferred_methods(preferred: Option<&JsonValue>) -> Vec<String> {
    let from_array = |items: &[JsonValue]| {
        items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_lowercase())
            .collect::<Vec<_>>()
    };
    match preferred {
        Some(JsonValue::Array(items)) => from_array(items),
        Some(JsonValue::String(raw)) => match serde_json::from_str::<JsonValue>(raw) {
            Ok(JsonValue::Array(items)) => from_array(&items),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}
