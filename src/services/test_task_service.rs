use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::dto::cron_dto::{CronReport, ItemOutcome};
use crate::error::{Error, Result};
use crate::models::candidate::{Candidate, CandidateGuard, CandidatePatch, TestTaskStatus};
use crate::models::conversation::MessageType;
use crate::models::hiring_request::HiringRequest;
use crate::models::pipeline::PipelineEvent;
use crate::services::llm_service::{Prompt, PromptKind};
use crate::services::ServiceContext;
use crate::utils::ai_json::parse_test_evaluation;
use crate::utils::time::{deadline_after_days, end_of_local_day, format_local};
use crate::utils::token::{generate_access_token, LINK_TOKEN_LEN};

/// Generated task messages shorter than this are replaced by the template.
const MIN_MESSAGE_CHARS: usize = 50;
const MAX_EXTENSIONS: i32 = 1;
const DEFAULT_EXTENSION_DAYS: i64 = 2;
const MAX_EXTENSION_DAYS: i64 = 3;
/// A `scheduled` claim older than this belongs to a send that never finished.
pub const STALE_CLAIM_MINUTES: i64 = 15;
const FINAL_WRITE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { deadline: DateTime<Utc> },
    AlreadySent { deadline: Option<DateTime<Utc>> },
    AlreadySubmitted,
    /// Another invocation holds the `scheduled` claim.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub status: TestTaskStatus,
    pub submitted_at: DateTime<Utc>,
    pub on_time: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Telegram(i64),
    Email,
}

#[derive(Clone)]
pub struct TestTaskService {
    ctx: ServiceContext,
}

impl TestTaskService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub fn submission_url(&self, token: &str) -> String {
        self.ctx.link(&format!("submit-test?token={}", token))
    }

    /// Sends the request's test task once. Shared by the automation handler
    /// and the bot's "ready" branch.
    pub async fn send(&self, candidate_id: Uuid, request_id: Uuid) -> Result<SendOutcome> {
        let candidate = self.ctx.candidate(candidate_id).await?;
        let request = self.ctx.request(request_id).await?;
        let now = Utc::now();
        let stale_before = now - Duration::minutes(STALE_CLAIM_MINUTES);

        match candidate.test_task_status {
            TestTaskStatus::NotSent => {}
            TestTaskStatus::Scheduled
                if candidate.test_task_claimed_at.is_some_and(|at| at >= stale_before) =>
            {
                return Ok(SendOutcome::Duplicate)
            }
            TestTaskStatus::Scheduled => {
                tracing::warn!(%candidate_id, "Taking over a stale test task claim");
            }
            TestTaskStatus::Sent => {
                return Ok(SendOutcome::AlreadySent {
                    deadline: candidate.test_task_deadline,
                })
            }
            _ => return Ok(SendOutcome::AlreadySubmitted),
        }

        let task_url = request
            .test_task_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                Error::Precondition(format!("Request {} has no test task URL", request.id))
            })?
            .to_string();
        candidate.pipeline_stage.apply(PipelineEvent::TestTaskSent)?;
        let channel = match (candidate.telegram_chat_id, candidate.email.as_deref()) {
            (Some(chat_id), _) => Channel::Telegram(chat_id),
            (None, Some(email)) if !email.trim().is_empty() => Channel::Email,
            _ => {
                return Err(Error::Precondition(format!(
                    "Candidate {} has neither a Telegram chat nor an email",
                    candidate.id
                )))
            }
        };

        if !self
            .ctx
            .repos
            .candidates
            .claim_test_task(candidate.id, now, stale_before)
            .await?
        {
            return Ok(SendOutcome::Duplicate);
        }

        let deadline = deadline_after_days(
            now,
            i64::from(request.test_task_deadline_days.max(1)),
            self.ctx.settings.timezone,
        );
        let token = generate_access_token(LINK_TOKEN_LEN);
        let text = self
            .compose_message(&candidate, &request, &task_url, &token, deadline)
            .await;

        let delivered = match channel {
            Channel::Telegram(chat_id) => self
                .ctx
                .messenger
                .send_message(chat_id, &text, None)
                .await
                .map(|_| ()),
            Channel::Email => {
                let to = candidate.email.clone().unwrap_or_default();
                let subject = format!("Тестове завдання: {}", request.title);
                self.ctx.mailer.send_email(&to, &subject, &text).await
            }
        };
        if let Err(e) = delivered {
            self.ctx.repos.candidates.release_test_task(candidate.id).await?;
            return Err(e);
        }

        let sent = CandidatePatch {
            test_task_status: Some(TestTaskStatus::Sent),
            test_task_sent_at: Some(now),
            test_task_original_deadline: Some(deadline),
            test_task_deadline: Some(deadline),
            test_task_token: Some(token),
            ..CandidatePatch::default()
        };
        if !self.finish_send(candidate.id, &sent).await? {
            tracing::error!(candidate_id = %candidate.id, "Test task delivered but the claim was lost");
        }
        self.ctx
            .advance_stage(candidate.id, candidate.pipeline_stage, PipelineEvent::TestTaskSent)
            .await?;

        let via = match channel {
            Channel::Telegram(_) => "telegram",
            Channel::Email => "email",
        };
        self.ctx
            .conversations
            .log_outbound(
                candidate.id,
                Some(request.id),
                MessageType::TestTask,
                &text,
                json!({ "deadline": deadline, "via": via }),
            )
            .await?;
        tracing::info!(candidate_id = %candidate.id, request_id = %request.id, %deadline, "Test task sent");
        Ok(SendOutcome::Sent { deadline })
    }

    /// `scheduled -> sent` for a delivered task. Transient store errors are
    /// retried so a sent task is not left looking unsent.
    async fn finish_send(&self, candidate_id: Uuid, sent: &CandidatePatch) -> Result<bool> {
        let guard = CandidateGuard::test_task(TestTaskStatus::Scheduled);
        let mut attempt = 1;
        loop {
            match self.ctx.repos.candidates.patch(candidate_id, sent, &guard).await {
                Ok(applied) => return Ok(applied),
                Err(e) if attempt < FINAL_WRITE_ATTEMPTS => {
                    tracing::warn!(%candidate_id, attempt, error = %e, "Recording sent test task failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(200 * u64::from(attempt))).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn compose_message(
        &self,
        candidate: &Candidate,
        request: &HiringRequest,
        task_url: &str,
        token: &str,
        deadline: DateTime<Utc>,
    ) -> String {
        let submit_url = self.submission_url(token);
        let deadline_text = format_local(deadline, self.ctx.settings.timezone);
        let fallback = format!(
            "Вітаємо, {}!\n\nДякуємо за інтерес до вакансії «{}». Пропонуємо виконати тестове завдання: {}\n\n\
             Термін виконання: до {}. Надіслати рішення можна тут: {}\n\nУспіхів!",
            candidate.first_name(),
            request.title,
            task_url,
            deadline_text,
            submit_url
        );
        let prompt = Prompt::new(
            PromptKind::TestTaskMessage,
            "Ти рекрутер компанії Vamos. Напиши коротке дружнє повідомлення українською \
             з тестовим завданням. Без емодзі. Обов'язково вкажи дедлайн.",
            json!({
                "first_name": candidate.first_name(),
                "request_title": request.title,
                "test_task_url": task_url,
                "deadline": deadline_text,
            }),
        );
        let mut text = self
            .ctx
            .llm
            .generate_or(&prompt, fallback, MIN_MESSAGE_CHARS)
            .await;
        if !text.contains(task_url) {
            text.push_str(&format!("\n\nЗавдання: {}", task_url));
        }
        if !text.contains(&submit_url) {
            text.push_str(&format!("\nНадіслати рішення: {}", submit_url));
        }
        text
    }

    pub async fn submit_by_token(&self, token: &str, submission: &str) -> Result<Submission> {
        let candidate = self
            .ctx
            .repos
            .candidates
            .find_by_test_token(token)
            .await?
            .ok_or_else(|| Error::NotFound("Test task not found".to_string()))?;
        self.record_submission(candidate, submission).await
    }

    /// Stores the solution and grades it against the current deadline.
    pub async fn record_submission(
        &self,
        candidate: Candidate,
        submission: &str,
    ) -> Result<Submission> {
        if candidate.test_task_status.is_submitted() {
            return Err(Error::Precondition(
                "Test task has already been submitted".to_string(),
            ));
        }
        if !candidate.test_task_status.is_awaiting_submission() {
            return Err(Error::Precondition(
                "No test task is awaiting submission".to_string(),
            ));
        }

        let now = Utc::now();
        let on_time = candidate.test_task_deadline.map_or(true, |d| now <= d);
        let status = if on_time {
            TestTaskStatus::SubmittedOnTime
        } else {
            TestTaskStatus::SubmittedLate
        };
        let patch = CandidatePatch {
            test_task_status: Some(status),
            test_task_submission: Some(submission.to_string()),
            test_task_submitted_at: Some(now),
            ..CandidatePatch::default()
        };
        if !self
            .ctx
            .repos
            .candidates
            .patch(candidate.id, &patch, &CandidateGuard::test_task(TestTaskStatus::Sent))
            .await?
        {
            return Err(Error::Precondition(
                "Test task has already been submitted".to_string(),
            ));
        }
        self.ctx
            .advance_stage(candidate.id, candidate.pipeline_stage, PipelineEvent::TestTaskSubmitted)
            .await?;

        let request_id = self.ctx.conversations.latest_request_id(candidate.id).await?;
        self.ctx
            .conversations
            .log_inbound(
                candidate.id,
                request_id,
                MessageType::TestSubmission,
                submission,
                json!({ "on_time": on_time }),
            )
            .await?;
        tracing::info!(candidate_id = %candidate.id, on_time, "Test task submitted");

        Ok(Submission {
            status,
            submitted_at: now,
            on_time,
        })
    }

    /// Handles a candidate's request for more time and returns the reply.
    /// Exactly one extension of 1 to 3 days is granted per task.
    pub async fn extend_deadline(&self, candidate: Candidate, message: &str) -> Result<String> {
        let deadline = match (candidate.test_task_status, candidate.test_task_deadline) {
            (TestTaskStatus::Sent, Some(deadline)) => deadline,
            _ => {
                return Ok("Наразі у вас немає активного тестового завдання, \
                           тож продовжувати термін не потрібно."
                    .to_string())
            }
        };
        let refusal = || {
            format!(
                "На жаль, термін виконання вже продовжувався один раз. \
                 Будь ласка, надішліть рішення до {}.",
                format_local(deadline, self.ctx.settings.timezone)
            )
        };
        if candidate.test_task_extensions >= MAX_EXTENSIONS {
            return Ok(refusal());
        }

        let days = requested_days(message);
        let new_deadline = end_of_local_day(deadline + Duration::days(days), self.ctx.settings.timezone);
        let patch = CandidatePatch {
            test_task_deadline: Some(new_deadline),
            test_task_extensions: Some(candidate.test_task_extensions + 1),
            ..CandidatePatch::default()
        };
        let guard = CandidateGuard {
            test_task_status: Some(TestTaskStatus::Sent),
            test_task_extensions: Some(candidate.test_task_extensions),
            ..CandidateGuard::default()
        };
        if !self.ctx.repos.candidates.patch(candidate.id, &patch, &guard).await? {
            // extended or submitted by a concurrent update
            return Ok(refusal());
        }
        tracing::info!(candidate_id = %candidate.id, days, %new_deadline, "Test task deadline extended");

        let deadline_text = format_local(new_deadline, self.ctx.settings.timezone);
        let fallback = format!(
            "Звісно, {}! Ми продовжили термін виконання тестового завдання до {}.",
            candidate.first_name(),
            deadline_text
        );
        let prompt = Prompt::new(
            PromptKind::DeadlineExtensionReply,
            "Ти рекрутер компанії Vamos. Коротко (1-2 речення, без емодзі) підтверди кандидату \
             продовження терміну тестового завдання і назви нову дату.",
            json!({
                "first_name": candidate.first_name(),
                "days": days,
                "new_deadline": deadline_text,
            }),
        );
        let mut reply = self.ctx.llm.generate_or(&prompt, fallback, 20).await;
        if !reply.contains(&deadline_text) {
            reply.push_str(&format!(" Новий дедлайн: {}.", deadline_text));
        }
        Ok(reply)
    }

    /// AI evaluation of submitted tasks, oldest submission first.
    pub async fn evaluate_pending(&self, limit: i64) -> Result<CronReport> {
        let mut report = CronReport::default();
        let submitted = self
            .ctx
            .repos
            .candidates
            .list_submitted_test_tasks(limit)
            .await?;
        for candidate in submitted {
            let outcome = match self.evaluate(candidate).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(error = %e, "Test task evaluation failed");
                    ItemOutcome::Failed
                }
            };
            report.record(outcome);
        }
        Ok(report)
    }

    async fn evaluate(&self, candidate: Candidate) -> Result<ItemOutcome> {
        let submitted_status = candidate.test_task_status;
        let evaluating = CandidatePatch {
            test_task_status: Some(TestTaskStatus::Evaluating),
            ..CandidatePatch::default()
        };
        if !self
            .ctx
            .repos
            .candidates
            .patch(candidate.id, &evaluating, &CandidateGuard::test_task(submitted_status))
            .await?
        {
            return Ok(ItemOutcome::Skipped);
        }

        let prompt = Prompt::new(
            PromptKind::TestTaskEvaluation,
            "Ти технічний експерт. Оціни рішення тестового завдання за шкалою 0-100. \
             Поверни JSON: {\"score\": 0-100, \"feedback\": \"...\"}.",
            json!({
                "submission": candidate.test_task_submission,
                "submitted_late": submitted_status == TestTaskStatus::SubmittedLate,
            }),
        );
        let evaluation = match self.ctx.llm.generate(&prompt).await {
            Ok(text) => parse_test_evaluation(&text).map_err(Error::from),
            Err(e) => Err(e),
        };
        let in_evaluation = CandidateGuard::test_task(TestTaskStatus::Evaluating);
        match evaluation {
            Ok(evaluation) => {
                let evaluated = CandidatePatch {
                    test_task_status: Some(TestTaskStatus::Evaluated),
                    test_task_ai_score: Some(evaluation.score),
                    test_task_ai_evaluation: Some(evaluation.feedback),
                    ..CandidatePatch::default()
                };
                self.ctx
                    .repos
                    .candidates
                    .patch(candidate.id, &evaluated, &in_evaluation)
                    .await?;
                tracing::info!(candidate_id = %candidate.id, score = evaluation.score, "Test task evaluated");
                Ok(ItemOutcome::Succeeded)
            }
            Err(e) => {
                // back to the queue for the next maintenance pass
                let requeue = CandidatePatch {
                    test_task_status: Some(submitted_status),
                    ..CandidatePatch::default()
                };
                self.ctx
                    .repos
                    .candidates
                    .patch(candidate.id, &requeue, &in_evaluation)
                    .await?;
                Err(e)
            }
        }
    }

    /// Human decision on an AI-evaluated task.
    pub async fn review(
        &self,
        candidate_id: Uuid,
        approved: bool,
        feedback: Option<String>,
    ) -> Result<Candidate> {
        let candidate = self.ctx.candidate(candidate_id).await?;
        if candidate.test_task_status != TestTaskStatus::Evaluated {
            return Err(Error::Precondition(format!(
                "Test task is {}, expected evaluated",
                candidate.test_task_status
            )));
        }
        let patch = CandidatePatch {
            test_task_status: Some(if approved {
                TestTaskStatus::Approved
            } else {
                TestTaskStatus::Rejected
            }),
            test_task_feedback: feedback,
            ..CandidatePatch::default()
        };
        if !self
            .ctx
            .repos
            .candidates
            .patch(candidate_id, &patch, &CandidateGuard::test_task(TestTaskStatus::Evaluated))
            .await?
        {
            return Err(Error::Precondition("Test task has already been reviewed".to_string()));
        }
        self.ctx.candidate(candidate_id).await
    }
}

/// First integer in the message, clamped to 1..=3; 2 when none is given.
fn requested_days(message: &str) -> i64 {
    let digits: String = message
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits
        .parse::<i64>()
        .map(|d| d.clamp(1, MAX_EXTENSION_DAYS))
        .unwrap_or(DEFAULT_EXTENSION_DAYS)
}
