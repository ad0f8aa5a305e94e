use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value as JsonValue};

use crate::config::LlmMode;
use crate::error::{Error, Result};

/// What a prompt is for. The live backend ignores it; the mock mode uses it
/// to pick a canned answer with the same shape the parsers expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Analysis,
    Match,
    Classification,
    OutreachPersonalization,
    TestTaskMessage,
    JobQuestionReply,
    DeadlineExtensionReply,
    TestTaskEvaluation,
    QuestionnaireEvaluation,
}

#[derive(Debug, Clone)]
pub struct Prompt {
    pub kind: PromptKind,
    pub system: String,
    /// Structured context serialized as JSON.
    pub user: JsonValue,
}

impl Prompt {
    pub fn new(kind: PromptKind, system: impl Into<String>, user: JsonValue) -> Self {
        Self {
            kind,
            system: system.into(),
            user,
        }
    }

    fn user_str(&self, field: &str) -> &str {
        self.user.get(field).and_then(|v| v.as_str()).unwrap_or("")
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Chat-completions client for the OpenAI API.
pub struct OpenAiBackend {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenAiBackend {
    pub fn new(client: Client, api_key: String, model: String) -> Self {
        Self {
            client,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "temperature": 0.4
        });

        let res = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&payload)
            .timeout(Duration::from_secs(60))
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("OpenAI API error {}: {}", status, text)));
        }

        let body: JsonValue = res.json().await?;
        body.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| Error::Llm("Invalid OpenAI response format".to_string()))
    }
}

/// Single entry point for model calls. The mode is fixed at construction.
#[derive(Clone)]
pub struct LlmGateway {
    mode: LlmMode,
    backend: Option<Arc<dyn LlmBackend>>,
}

impl LlmGateway {
    pub fn live(backend: Arc<dyn LlmBackend>) -> Self {
        Self {
            mode: LlmMode::Live,
            backend: Some(backend),
        }
    }

    pub fn mock() -> Self {
        Self {
            mode: LlmMode::Mock,
            backend: None,
        }
    }

    pub fn mode(&self) -> LlmMode {
        self.mode
    }

    pub async fn generate(&self, prompt: &Prompt) -> Result<String> {
        match (self.mode, &self.backend) {
            (LlmMode::Mock, _) => Ok(mock_response(prompt)),
            (LlmMode::Live, Some(backend)) => {
                backend
                    .complete(&prompt.system, &prompt.user.to_string())
                    .await
            }
            (LlmMode::Live, None) => Err(Error::Llm("no LLM backend configured".to_string())),
        }
    }

    /// Generated text, or `fallback` when the call fails or returns fewer
    /// than `min_chars` characters.
    pub async fn generate_or(&self, prompt: &Prompt, fallback: String, min_chars: usize) -> String {
        match self.generate(prompt).await {
            Ok(text) if text.trim().chars().count() >= min_chars => text.trim().to_string(),
            Ok(text) => {
                tracing::warn!(
                    kind = ?prompt.kind,
                    len = text.chars().count(),
                    "LLM output too short, using template"
                );
                fallback
            }
            Err(e) => {
                tracing::warn!(kind = ?prompt.kind, error = %e, "LLM call failed, using template");
                fallback
            }
        }
    }
}

fn mock_response(prompt: &Prompt) -> String {
    match prompt.kind {
        PromptKind::Analysis => json!({
            "score": 8,
            "category": "strong_match",
            "summary": "Досвідчений кандидат з релевантним досвідом.",
            "strengths": ["комунікація", "досвід у продажах"],
            "concerns": ["немає досвіду керування командою"],
            "recommendation": "invite",
            "reasoning": "mock analysis"
        })
        .to_string(),
        PromptKind::Match => format!(
            "Результат оцінки:\n{}",
            json!({
                "match_score": 80,
                "alignment": "Навички збігаються з вимогами вакансії.",
                "missing": [],
                "recommendation": "proceed"
            })
        ),
        PromptKind::Classification => {
            let category = mock_classify(
                prompt.user_str("message"),
                prompt
                    .user
                    .get("has_received_test_task")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
            );
            json!({ "category": category, "confidence": 0.9 }).to_string()
        }
        PromptKind::OutreachPersonalization => prompt
            .user_str("template")
            .replace("{name}", prompt.user_str("first_name")),
        PromptKind::TestTaskMessage => format!(
            "Вітаємо, {}! Дякуємо за інтерес до вакансії «{}». Надсилаємо тестове завдання, \
             будь ласка, виконайте його до {}.",
            prompt.user_str("first_name"),
            prompt.user_str("request_title"),
            prompt.user_str("deadline")
        ),
        PromptKind::JobQuestionReply => "Дякуємо за запитання! Деталі щодо вакансії ми обговоримо \
             на наступному етапі, а поки радимо ознайомитися з тестовим завданням."
            .to_string(),
        PromptKind::DeadlineExtensionReply => format!(
            "Звісно, ми продовжили термін виконання тестового завдання до {}. Успіхів!",
            prompt.user_str("new_deadline")
        ),
        PromptKind::TestTaskEvaluation => json!({
            "score": 75,
            "feedback": "Завдання виконано якісно, є кілька дрібних зауважень."
        })
        .to_string(),
        PromptKind::QuestionnaireEvaluation => json!({
            "overall_score": 7,
            "summary": "Відповіді змістовні та послідовні."
        })
        .to_string(),
    }
}

/// Keyword heuristics standing in for the classifier model offline.
fn mock_classify(message: &str, has_received_test_task: bool) -> &'static str {
    let text = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if has_received_test_task
        && has(&["дн", "продов", "відклад", "час", "термін", "deadline", "extend", "extension"])
    {
        return "request_deadline_extension";
    }
    if has_received_test_task && has(&["http", "github", "готово", "виконав", "виконала", "надсилаю"])
    {
        return "test_task_submission";
    }
    if has(&["не цікав", "ні, дякую", "не актуаль", "відмовля", "not interested"]) {
        return "negative";
    }
    let positive = has(&["так", "цікаво", "готов", "хочу", "yes", "ready"]);
    let question = text.contains('?');
    match (positive, question) {
        (true, true) => "positive_with_questions",
        (false, true) => "questions_about_job",
        (true, false) => "positive_ready",
        (false, false) => "default",
    }
}
