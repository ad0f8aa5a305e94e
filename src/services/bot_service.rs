//! Conversation state machine behind the Telegram webhook.

use serde_json::json;
use uuid::Uuid;

use crate::dto::callback_dto::{CallbackPayload, FeedbackRating};
use crate::dto::telegram_dto::{CallbackQuery, InlineKeyboardMarkup, Message, Update};
use crate::error::Result;
use crate::models::automation_job::ActionType;
use crate::models::candidate::{Candidate, CandidateGuard, CandidatePatch, OutreachStatus};
use crate::models::conversation::MessageType;
use crate::models::pipeline::PipelineEvent;
use crate::services::automation_queue::AutomationQueue;
use crate::services::classifier_service::{Category, ClassificationContext, ClassifierService};
use crate::services::llm_service::{Prompt, PromptKind};
use crate::services::test_task_service::{SendOutcome, TestTaskService};
use crate::services::ServiceContext;
use crate::utils::time::format_local;
use crate::utils::validation::normalize_telegram_username;

const APPLY_FIRST: &str = "Вітаємо! Ми не знайшли вашої анкети. Будь ласка, спершу подайте заявку \
на сайті Vamos, і ми обов'язково з вами зв'яжемося:";
const NEGATIVE_REPLY: &str = "Дякуємо за відповідь! Шкода, що зараз вакансія вам не підходить. \
Будемо раді залишитися на зв'язку, бажаємо успіхів!";
const DEFAULT_REPLY: &str = "Дякуємо за повідомлення! Ми отримали його і незабаром повернемося з відповіддю.";
const JOB_QUESTION_FALLBACK: &str = "Дякуємо за запитання! Рекрутер відповість вам найближчим часом, \
а поки радимо ознайомитися з тестовим завданням.";
const RATING_PROMPT: &str = "Дякуємо, ми отримали ваше рішення! Оцініть, будь ласка, наскільки \
складним було завдання:";
const FEEDBACK_THANKS: &str = "Дякуємо за відгук! Ми повідомимо вас про результати перевірки.";
const INTERESTED_REPLY: &str = "Чудово, дякуємо! Незабаром надішлемо вам наступний крок.";

const JOB_QUESTION_SYSTEM: &str = "Ти рекрутер компанії Vamos і відповідаєш кандидату в Telegram. \
Відповідай українською, 2-3 речення, без емодзі. Спирайся лише на надану інформацію про вакансію. \
Ніколи не називай конкретних сум чи умов оплати. Наприкінці м'яко запропонуй виконати тестове завдання.";

#[derive(Clone)]
pub struct BotService {
    ctx: ServiceContext,
    classifier: ClassifierService,
    test_tasks: TestTaskService,
    automation: AutomationQueue,
}

impl BotService {
    pub fn new(
        ctx: ServiceContext,
        classifier: ClassifierService,
        test_tasks: TestTaskService,
        automation: AutomationQueue,
    ) -> Self {
        Self {
            ctx,
            classifier,
            test_tasks,
            automation,
        }
    }

    pub async fn handle_update(&self, update: Update) -> Result<()> {
        if let Some(callback) = update.callback_query {
            return self.handle_callback(callback).await;
        }
        if let Some(message) = update.message {
            return self.handle_message(message).await;
        }
        Ok(())
    }

    async fn reply(&self, chat_id: i64, text: &str, keyboard: Option<&InlineKeyboardMarkup>) -> Result<()> {
        self.ctx.messenger.send_message(chat_id, text, keyboard).await?;
        Ok(())
    }

    async fn handle_message(&self, message: Message) -> Result<()> {
        let Some(text) = message.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
            return Ok(());
        };
        let chat_id = message.chat.id;
        let username = message
            .from
            .as_ref()
            .and_then(|u| u.username.as_deref())
            .and_then(normalize_telegram_username);
        let username = username.as_deref();

        if text.starts_with("/start") {
            if let Some(candidate) = self.ctx.repos.candidates.find_by_chat(chat_id, username).await? {
                self.remember_chat(candidate, chat_id).await?;
            }
            let welcome = format!(
                "Вітаємо у чат-боті Vamos! Тут ви отримуватимете новини щодо вашої кандидатури. \
                 Якщо ви ще не подали заявку, зробіть це тут: {}",
                self.ctx.link("apply")
            );
            return self.reply(chat_id, &welcome, None).await;
        }

        let Some(candidate) = self.ctx.repos.candidates.find_by_chat(chat_id, username).await? else {
            tracing::info!(chat_id, "Message from unknown sender");
            let text = format!("{} {}", APPLY_FIRST, self.ctx.link("apply"));
            return self.reply(chat_id, &text, None).await;
        };
        let candidate = self.remember_chat(candidate, chat_id).await?;
        let request_id = self.current_request_id(&candidate).await?;

        self.ctx
            .conversations
            .log_inbound(
                candidate.id,
                request_id,
                MessageType::Text,
                text,
                json!({ "telegram_message_id": message.message_id }),
            )
            .await?;

        let context = ClassificationContext::for_candidate(&candidate);
        let category = self.classifier.classify(text, context).await;
        tracing::info!(candidate_id = %candidate.id, ?category, "Inbound message classified");

        match category {
            Category::PositiveReady => self.on_ready(candidate, request_id, chat_id).await,
            Category::RequestDeadlineExtension => {
                let candidate_id = candidate.id;
                let reply = self.test_tasks.extend_deadline(candidate, text).await?;
                self.reply(chat_id, &reply, None).await?;
                self.ctx
                    .conversations
                    .log_outbound(candidate_id, request_id, MessageType::DeadlineExtension, &reply, json!({}))
                    .await
            }
            Category::TestTaskSubmission => self.on_submission(candidate, request_id, chat_id, text).await,
            Category::PositiveWithQuestions | Category::QuestionsAboutJob => {
                self.on_question(&candidate, chat_id, text).await
            }
            Category::Negative => {
                self.reply(chat_id, NEGATIVE_REPLY, None).await?;
                self.ctx
                    .patch_candidate(
                        candidate.id,
                        CandidatePatch {
                            outreach_status: Some(OutreachStatus::Declined),
                            ..CandidatePatch::default()
                        },
                    )
                    .await?;
                self.ctx
                    .conversations
                    .log_outbound(candidate.id, request_id, MessageType::BotReply, NEGATIVE_REPLY, json!({ "category": "negative" }))
                    .await
            }
            Category::Default => {
                self.reply(chat_id, DEFAULT_REPLY, None).await?;
                self.ctx
                    .conversations
                    .log_outbound(candidate.id, request_id, MessageType::BotReply, DEFAULT_REPLY, json!({ "category": "default" }))
                    .await
            }
        }
    }

    /// Stores the chat id the first time a known candidate writes to the bot.
    async fn remember_chat(&self, mut candidate: Candidate, chat_id: i64) -> Result<Candidate> {
        if candidate.telegram_chat_id != Some(chat_id) {
            self.ctx
                .patch_candidate(
                    candidate.id,
                    CandidatePatch {
                        telegram_chat_id: Some(chat_id),
                        ..CandidatePatch::default()
                    },
                )
                .await?;
            candidate.telegram_chat_id = Some(chat_id);
            tracing::info!(candidate_id = %candidate.id, chat_id, "Learned Telegram chat id");
        }
        Ok(candidate)
    }

    /// Request last discussed with the candidate, else their best match.
    async fn current_request_id(&self, candidate: &Candidate) -> Result<Option<Uuid>> {
        if let Some(id) = self.ctx.conversations.latest_request_id(candidate.id).await? {
            return Ok(Some(id));
        }
        Ok(self
            .ctx
            .repos
            .matches
            .best_for_candidate(candidate.id)
            .await?
            .map(|m| m.request_id))
    }

    async fn on_ready(&self, candidate: Candidate, request_id: Option<Uuid>, chat_id: i64) -> Result<()> {
        let Some(request_id) = request_id else {
            return self.reply(chat_id, DEFAULT_REPLY, None).await;
        };
        let tz = self.ctx.settings.timezone;
        let reply = match self.test_tasks.send(candidate.id, request_id).await {
            Ok(SendOutcome::Sent { .. }) => return Ok(()),
            Ok(SendOutcome::AlreadySent { deadline }) => match deadline {
                Some(d) => format!(
                    "Тестове завдання вже надіслано вам раніше. Термін виконання: до {}.",
                    format_local(d, tz)
                ),
                None => "Тестове завдання вже надіслано вам раніше.".to_string(),
            },
            Ok(SendOutcome::AlreadySubmitted) => {
                "Ми вже отримали ваше рішення тестового завдання, дякуємо! Зараз воно на перевірці.".to_string()
            }
            Ok(SendOutcome::Duplicate) => {
                "Ми вже готуємо для вас тестове завдання, воно надійде найближчим часом.".to_string()
            }
            Err(e) => {
                tracing::error!(candidate_id = %candidate.id, error = %e, "Could not send test task from chat");
                DEFAULT_REPLY.to_string()
            }
        };
        self.reply(chat_id, &reply, None).await?;
        self.ctx
            .conversations
            .log_outbound(candidate.id, Some(request_id), MessageType::BotReply, &reply, json!({ "category": "positive_ready" }))
            .await
    }

    async fn on_submission(
        &self,
        candidate: Candidate,
        request_id: Option<Uuid>,
        chat_id: i64,
        text: &str,
    ) -> Result<()> {
        let candidate_id = candidate.id;
        match self.test_tasks.record_submission(candidate, text).await {
            Ok(_) => {
                let keyboard = InlineKeyboardMarkup::single_row(
                    FeedbackRating::ALL
                        .into_iter()
                        .map(|rating| {
                            CallbackPayload::Feedback {
                                rating,
                                candidate_id,
                            }
                            .button(rating.label())
                        })
                        .collect(),
                );
                self.reply(chat_id, RATING_PROMPT, Some(&keyboard)).await?;
                self.ctx
                    .conversations
                    .log_outbound(candidate_id, request_id, MessageType::BotReply, RATING_PROMPT, json!({ "category": "test_task_submission" }))
                    .await
            }
            Err(e) => {
                tracing::warn!(%candidate_id, error = %e, "Submission via chat rejected");
                let reply = "Схоже, зараз у вас немає відкритого тестового завдання. \
                             Якщо це помилка, рекрутер зв'яжеться з вами.";
                self.reply(chat_id, reply, None).await?;
                self.ctx
                    .conversations
                    .log_outbound(candidate_id, request_id, MessageType::BotReply, reply, json!({ "category": "test_task_submission" }))
                    .await
            }
        }
    }

    async fn on_question(&self, candidate: &Candidate, chat_id: i64, text: &str) -> Result<()> {
        let best = self.ctx.repos.matches.best_for_candidate(candidate.id).await?;
        let request = match &best {
            Some(m) => self.ctx.repos.requests.get(m.request_id).await?,
            None => None,
        };
        let prompt = Prompt::new(
            PromptKind::JobQuestionReply,
            JOB_QUESTION_SYSTEM,
            json!({
                "question": text,
                "first_name": candidate.first_name(),
                "request_title": request.as_ref().map(|r| r.title.clone()),
                "request_description": request.as_ref().and_then(|r| r.description.clone()),
                "skills": request.as_ref().map(|r| r.skills.clone()).unwrap_or_default(),
                "match_explanation": best.as_ref().and_then(|m| m.explanation.clone()),
            }),
        );
        let reply = self
            .ctx
            .llm
            .generate_or(&prompt, JOB_QUESTION_FALLBACK.to_string(), 20)
            .await;
        self.reply(chat_id, &reply, None).await?;
        self.ctx
            .conversations
            .log_outbound(candidate.id, request.map(|r| r.id), MessageType::BotReply, &reply, json!({ "category": "questions_about_job" }))
            .await
    }

    async fn handle_callback(&self, callback: CallbackQuery) -> Result<()> {
        if let Err(e) = self.ctx.messenger.answer_callback_query(&callback.id, None).await {
            tracing::warn!(error = %e, "answerCallbackQuery failed");
        }
        let Some(payload) = callback.data.as_deref().and_then(CallbackPayload::decode) else {
            tracing::debug!(data = ?callback.data, "Ignoring unknown callback payload");
            return Ok(());
        };
        let chat_id = callback
            .message
            .as_ref()
            .map(|m| m.chat.id)
            .unwrap_or(callback.from.id);

        match payload {
            CallbackPayload::Feedback { rating, candidate_id } => {
                self.on_feedback(rating, candidate_id, chat_id).await
            }
            CallbackPayload::OutreachReply {
                interested,
                candidate_id,
                request_id,
            } => {
                let message_id = callback.message.as_ref().map(|m| m.message_id);
                self.on_outreach_reply(interested, candidate_id, request_id, chat_id, message_id)
                    .await
            }
        }
    }

    async fn on_feedback(&self, rating: FeedbackRating, candidate_id: Uuid, chat_id: i64) -> Result<()> {
        let patch = CandidatePatch {
            test_task_difficulty: Some(rating.label().to_string()),
            ..CandidatePatch::default()
        };
        if !self
            .ctx
            .repos
            .candidates
            .patch(candidate_id, &patch, &CandidateGuard::default())
            .await?
        {
            tracing::warn!(%candidate_id, "Feedback for unknown candidate");
            return Ok(());
        }
        self.reply(chat_id, FEEDBACK_THANKS, None).await?;
        let request_id = self.ctx.conversations.latest_request_id(candidate_id).await?;
        self.ctx
            .conversations
            .log_inbound(candidate_id, request_id, MessageType::Feedback, rating.label(), json!({ "rating": rating.code() }))
            .await
    }

    async fn on_outreach_reply(
        &self,
        interested: bool,
        candidate_id: Uuid,
        request_id: Uuid,
        chat_id: i64,
        message_id: Option<i64>,
    ) -> Result<()> {
        let Some(candidate) = self.ctx.repos.candidates.get(candidate_id).await? else {
            tracing::warn!(%candidate_id, "Outreach reply for unknown candidate");
            return Ok(());
        };
        if candidate.telegram_chat_id.is_some_and(|id| id != chat_id) {
            tracing::warn!(%candidate_id, chat_id, "Outreach reply from a different chat, ignored");
            return Ok(());
        }

        if let Some(message_id) = message_id.or(candidate.outreach_message_id) {
            if let Err(e) = self.ctx.messenger.edit_message_reply_markup(chat_id, message_id).await {
                tracing::warn!(error = %e, "Could not remove outreach buttons");
            }
        }
        let (status, reply, content) = if interested {
            (OutreachStatus::Responded, INTERESTED_REPLY, "Так, цікаво")
        } else {
            (OutreachStatus::Declined, NEGATIVE_REPLY, "Ні, дякую")
        };
        let patch = CandidatePatch {
            outreach_status: Some(status),
            ..CandidatePatch::default()
        };
        let guard = CandidateGuard {
            outreach_status: Some(OutreachStatus::Sent),
            ..CandidateGuard::default()
        };
        if !self.ctx.repos.candidates.patch(candidate_id, &patch, &guard).await? {
            // already answered
            return Ok(());
        }
        if !interested {
            self.ctx
                .advance_stage(candidate_id, candidate.pipeline_stage, PipelineEvent::OutreachDeclined)
                .await?;
        }
        self.ctx
            .conversations
            .log_inbound(candidate_id, Some(request_id), MessageType::Text, content, json!({ "interested": interested }))
            .await?;
        self.reply(chat_id, reply, None).await?;

        if interested {
            let request = self.ctx.request(request_id).await?;
            let action = if request.has_questionnaire() {
                ActionType::SendQuestionnaire
            } else {
                ActionType::SendTestTask
            };
            self.automation
                .enqueue(action, candidate_id, request_id, None, None)
                .await?;
        }
        Ok(())
    }
}
