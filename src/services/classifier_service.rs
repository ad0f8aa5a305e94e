use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::json;

use crate::error::ParseError;
use crate::models::candidate::{Candidate, TestTaskStatus};
use crate::services::llm_service::{LlmGateway, Prompt, PromptKind};
use crate::utils::ai_json::parse_json_object;
use crate::utils::time::format_local;

/// Intent of an inbound candidate message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    PositiveReady,
    RequestDeadlineExtension,
    TestTaskSubmission,
    PositiveWithQuestions,
    QuestionsAboutJob,
    Negative,
    Default,
}

/// What the classifier is told about the candidate besides the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassificationContext {
    pub has_received_test_task: bool,
    pub test_task_deadline: Option<DateTime<Utc>>,
}

impl ClassificationContext {
    pub fn for_candidate(candidate: &Candidate) -> Self {
        let has_received_test_task = candidate.test_task_status == TestTaskStatus::Sent
            || candidate.test_task_status.is_submitted();
        Self {
            has_received_test_task,
            test_task_deadline: candidate.test_task_deadline.filter(|_| has_received_test_task),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClassificationOutput {
    category: Category,
}

pub fn parse_classification(text: &str) -> Result<Category, ParseError> {
    let output: ClassificationOutput = parse_json_object(text)?;
    Ok(output.category)
}

const SYSTEM_PROMPT: &str = "Ти класифікуєш повідомлення кандидата в HR-чаті компанії Vamos. \
Поверни лише JSON {\"category\": \"...\"} з однією з категорій: \
positive_ready (готовий отримати тестове завдання), \
request_deadline_extension (просить більше часу на тестове завдання), \
test_task_submission (надсилає рішення тестового завдання), \
positive_with_questions (зацікавлений, але має запитання), \
questions_about_job (запитання про вакансію), \
negative (не зацікавлений), \
default (усе інше). \
Якщо кандидат уже отримав тестове завдання, прохання про дні чи час означає request_deadline_extension.";

#[derive(Clone)]
pub struct ClassifierService {
    llm: LlmGateway,
    timezone: Tz,
}

impl ClassifierService {
    pub fn new(llm: LlmGateway, timezone: Tz) -> Self {
        Self { llm, timezone }
    }

    /// Never fails: model or parse errors degrade to [`Category::Default`].
    pub async fn classify(&self, message: &str, context: ClassificationContext) -> Category {
        let prompt = Prompt::new(
            PromptKind::Classification,
            SYSTEM_PROMPT,
            json!({
                "message": message,
                "has_received_test_task": context.has_received_test_task,
                "test_task_deadline": context
                    .test_task_deadline
                    .map(|d| format_local(d, self.timezone)),
            }),
        );
        let text = match self.llm.generate(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "Classification call failed");
                return Category::Default;
            }
        };
        match parse_classification(&text) {
            Ok(category) => category,
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable classification, using default");
                Category::Default
            }
        }
    }
}
