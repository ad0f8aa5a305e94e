//! Extraction of typed results from free-form model output.

use serde::de::DeserializeOwned;

use crate::error::ParseError;
use crate::models::analysis::{AnalysisResult, MatchResult};

/// Returns the first `{...}` in `text` that is a well-formed JSON object.
/// Balanced spans that do not parse, such as prose in braces, are skipped.
pub fn extract_first_json_object(text: &str) -> Option<&str> {
    text.match_indices('{')
        .filter_map(|(start, _)| balanced_span(text, start))
        .find(|span| {
            serde_json::from_str::<serde_json::Value>(span).is_ok_and(|v| v.is_object())
        })
}

/// The balanced `{...}` opening at `start`. Braces inside JSON string
/// literals (including escaped quotes) do not count towards the balance.
fn balanced_span(text: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn parse_json_object<T: DeserializeOwned>(text: &str) -> Result<T, ParseError> {
    let raw = extract_first_json_object(text).ok_or(ParseError::NoJsonObject)?;
    Ok(serde_json::from_str(raw)?)
}

fn check_range(field: &'static str, value: i32, min: i32, max: i32) -> Result<(), ParseError> {
    if value < min || value > max {
        return Err(ParseError::OutOfRange {
            field,
            value: i64::from(value),
        });
    }
    Ok(())
}

/// Candidate score must be within 1..=10.
pub fn parse_analysis(text: &str) -> Result<AnalysisResult, ParseError> {
    let result: AnalysisResult = parse_json_object(text)?;
    check_range("score", result.score, 1, 10)?;
    Ok(result)
}

/// Match score must be within 0..=100.
pub fn parse_match(text: &str) -> Result<MatchResult, ParseError> {
    let result: MatchResult = parse_json_object(text)?;
    check_range("match_score", result.match_score, 0, 100)?;
    Ok(result)
}

/// Test-task evaluation: score within 0..=100 plus free-text feedback.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct TestTaskEvaluation {
    pub score: i32,
    #[serde(default)]
    pub feedback: String,
}

pub fn parse_test_evaluation(text: &str) -> Result<TestTaskEvaluation, ParseError> {
    let result: TestTaskEvaluation = parse_json_object(text)?;
    check_range("score", result.score, 0, 100)?;
    Ok(result)
}
