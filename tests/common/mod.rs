#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use vamos_recruitment::{
    config::AutomationSettings,
    database::Repositories,
    dto::telegram_dto::{InlineKeyboardMarkup, SentMessage},
    error::{Error, Result},
    models::{
        candidate::{Candidate, CandidateSource},
        hiring_request::HiringRequest,
        pipeline::PipelineStage,
    },
    services::{
        email_service::EmailGateway, llm_service::LlmGateway, telegram_service::MessagingGateway,
    },
    AccessConfig, AppState,
};

pub const JWT_SECRET: &str = "test_secret_key";
pub const CRON_SECRET: &str = "cron_test_secret";
pub const WEBHOOK_SECRET: &str = "tg_test_secret";

#[derive(Debug, Clone)]
pub struct Outgoing {
    pub chat_id: i64,
    pub text: String,
    pub keyboard: Option<InlineKeyboardMarkup>,
}

/// Messaging gateway that records instead of calling Telegram.
#[derive(Default)]
pub struct RecordingMessenger {
    pub sent: Mutex<Vec<Outgoing>>,
    pub answered_callbacks: Mutex<Vec<String>>,
    pub cleared_markups: Mutex<Vec<(i64, i64)>>,
    pub fail_sends: Mutex<bool>,
}

impl RecordingMessenger {
    pub fn sent(&self) -> Vec<Outgoing> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, chat_id: i64) -> Vec<Outgoing> {
        self.sent().into_iter().filter(|m| m.chat_id == chat_id).collect()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.fail_sends.lock().unwrap() = failing;
    }
}

#[async_trait]
impl MessagingGateway for RecordingMessenger {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<SentMessage> {
        if *self.fail_sends.lock().unwrap() {
            return Err(Error::Messaging("Forbidden: bot was blocked by the user".to_string()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(Outgoing {
            chat_id,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        });
        Ok(SentMessage {
            message_id: 1000 + sent.len() as i64,
        })
    }

    async fn answer_callback_query(&self, callback_id: &str, _text: Option<&str>) -> Result<()> {
        self.answered_callbacks
            .lock()
            .unwrap()
            .push(callback_id.to_string());
        Ok(())
    }

    async fn edit_message_reply_markup(&self, chat_id: i64, message_id: i64) -> Result<()> {
        self.cleared_markups.lock().unwrap().push((chat_id, message_id));
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<Email>>,
}

#[async_trait]
impl EmailGateway for RecordingMailer {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        self.sent.lock().unwrap().push(Email {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

pub struct TestApp {
    pub state: AppState,
    pub repos: Repositories,
    pub messenger: Arc<RecordingMessenger>,
    pub mailer: Arc<RecordingMailer>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_webhook_secret(None)
    }

    pub fn with_webhook_secret(webhook_secret: Option<&str>) -> Self {
        Self::build(Repositories::in_memory(), LlmGateway::mock(), webhook_secret)
    }

    /// App over caller-built repositories and model gateway.
    pub fn with_parts(repos: Repositories, llm: LlmGateway) -> Self {
        Self::build(repos, llm, None)
    }

    fn build(repos: Repositories, llm: LlmGateway, webhook_secret: Option<&str>) -> Self {
        let messenger = Arc::new(RecordingMessenger::default());
        let mailer = Arc::new(RecordingMailer::default());
        let settings = AutomationSettings {
            base_url: "https://hr.vamos.test".to_string(),
            item_delay: Duration::ZERO,
            ..AutomationSettings::default()
        };
        let access = AccessConfig {
            jwt_secret: JWT_SECRET.to_string(),
            cron_secret: CRON_SECRET.to_string(),
            webhook_secret: webhook_secret.map(str::to_string),
            public_rps: 100,
        };
        let state = AppState::from_parts(
            repos.clone(),
            llm,
            messenger.clone(),
            mailer.clone(),
            settings,
            access,
        );
        Self {
            state,
            repos,
            messenger,
            mailer,
        }
    }

    pub fn router(&self) -> Router {
        vamos_recruitment::router(self.state.clone())
    }

    pub async fn candidate(&self, id: uuid::Uuid) -> Candidate {
        self.repos
            .candidates
            .get(id)
            .await
            .unwrap()
            .expect("candidate exists")
    }

    pub async fn seed_request(&self, edit: impl FnOnce(&mut HiringRequest)) -> HiringRequest {
        let mut request = HiringRequest::new("Менеджер з продажу");
        request.outreach_template = Some(
            "Вітаємо, {name}! Ми переглянули ваше резюме і хочемо запропонувати вакансію у Vamos."
                .to_string(),
        );
        request.outreach_template_approved = true;
        request.test_task_url = Some("https://docs.vamos.test/test-task".to_string());
        edit(&mut request);
        self.repos.requests.insert(&request).await.unwrap();
        request
    }

    pub async fn seed_candidate(&self, edit: impl FnOnce(&mut Candidate)) -> Candidate {
        let mut candidate = Candidate::new("Олена Коваль", CandidateSource::Cold);
        candidate.email = Some("olena@example.com".to_string());
        candidate.resume_text = Some("5 років у B2B продажах, CRM, переговори.".to_string());
        candidate.pipeline_stage = PipelineStage::Analyzed;
        candidate.score = Some(8);
        edit(&mut candidate);
        self.repos.candidates.insert(&candidate).await.unwrap();
        candidate
    }
}
