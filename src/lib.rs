pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, patch, post},
    Router,
};
use reqwest::Client;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::config::{AutomationSettings, Config, LlmMode};
use crate::database::Repositories;
use crate::error::Result;
use crate::middleware::{auth::require_hr_or_admin, cors::public_cors, rate_limit};
use crate::services::{
    action_handlers::ActionHandlers,
    analysis_service::AnalysisService,
    automation_queue::AutomationQueue,
    bot_service::BotService,
    classifier_service::ClassifierService,
    cron_service::CronService,
    email_service::{EmailGateway, LogMailer, SmtpMailer},
    llm_service::{LlmGateway, OpenAiBackend},
    outreach_queue::OutreachQueueService,
    questionnaire_service::QuestionnaireService,
    telegram_service::{MessagingGateway, TelegramGateway},
    test_task_service::TestTaskService,
    ServiceContext,
};

/// Shared secrets and limits of the HTTP surface.
#[derive(Debug, Clone)]
pub struct AccessConfig {
    pub jwt_secret: String,
    pub cron_secret: String,
    pub webhook_secret: Option<String>,
    pub public_rps: u32,
}

impl AccessConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            jwt_secret: config.jwt_secret.clone(),
            cron_secret: config.cron_secret.clone(),
            webhook_secret: config.telegram_webhook_secret.clone(),
            public_rps: config.public_rps,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub ctx: ServiceContext,
    pub automation: AutomationQueue,
    pub handlers: ActionHandlers,
    pub questionnaires: QuestionnaireService,
    pub test_tasks: TestTaskService,
    pub classifier: ClassifierService,
    pub bot: BotService,
    pub analysis: AnalysisService,
    pub outreach: OutreachQueueService,
    pub cron: CronService,
    pub jwt_secret: Arc<str>,
    pub cron_secret: Arc<str>,
    pub webhook_secret: Option<Arc<str>>,
    pub public_rps: u32,
}

impl AppState {
    pub fn new(pool: PgPool, config: &Config) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        let llm = match (config.llm_mode, &config.openai_api_key) {
            (LlmMode::Live, Some(key)) => LlmGateway::live(Arc::new(OpenAiBackend::new(
                http_client.clone(),
                key.clone(),
                config.openai_model.clone(),
            ))),
            _ => LlmGateway::mock(),
        };
        let messenger: Arc<dyn MessagingGateway> = Arc::new(TelegramGateway::new(
            http_client,
            config.telegram_bot_token.clone(),
        ));
        let mailer: Arc<dyn EmailGateway> = match &config.smtp {
            Some(smtp) => Arc::new(SmtpMailer::new(smtp)?),
            None => Arc::new(LogMailer),
        };

        Ok(Self::from_parts(
            Repositories::postgres(pool),
            llm,
            messenger,
            mailer,
            AutomationSettings::from_config(config),
            AccessConfig::from_config(config),
        ))
    }

    /// Wires every service over the given collaborators.
    pub fn from_parts(
        repos: Repositories,
        llm: LlmGateway,
        messenger: Arc<dyn MessagingGateway>,
        mailer: Arc<dyn EmailGateway>,
        settings: AutomationSettings,
        access: AccessConfig,
    ) -> Self {
        let timezone = settings.timezone;
        let ctx = ServiceContext::new(repos, llm.clone(), messenger, mailer, Arc::new(settings));

        let automation = AutomationQueue::new(ctx.repos.automation.clone());
        let questionnaires = QuestionnaireService::new(ctx.clone());
        let test_tasks = TestTaskService::new(ctx.clone());
        let classifier = ClassifierService::new(llm, timezone);
        let handlers = ActionHandlers::new(ctx.clone(), questionnaires.clone(), test_tasks.clone());
        let outreach = OutreachQueueService::new(ctx.clone());
        let analysis = AnalysisService::new(ctx.clone(), automation.clone(), outreach.clone());
        let bot = BotService::new(
            ctx.clone(),
            classifier.clone(),
            test_tasks.clone(),
            automation.clone(),
        );
        let cron = CronService::new(
            ctx.clone(),
            automation.clone(),
            handlers.clone(),
            outreach.clone(),
            analysis.clone(),
            questionnaires.clone(),
            test_tasks.clone(),
        );

        Self {
            ctx,
            automation,
            handlers,
            questionnaires,
            test_tasks,
            classifier,
            bot,
            analysis,
            outreach,
            cron,
            jwt_secret: access.jwt_secret.into(),
            cron_secret: access.cron_secret.into(),
            webhook_secret: access.webhook_secret.map(Into::into),
            public_rps: access.public_rps,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let operator_api = Router::new()
        .route("/api/automation/jobs", post(routes::automation::enqueue_job))
        .route(
            "/api/automation/jobs/:id/cancel",
            post(routes::automation::cancel_job),
        )
        .route(
            "/api/automation/candidates/:id/jobs",
            get(routes::automation::list_candidate_jobs),
        )
        .route(
            "/api/matches/:id/decision",
            post(routes::automation::decide_match),
        )
        .route(
            "/api/analysis/candidates/:id",
            post(routes::automation::enqueue_analysis),
        )
        .route("/api/outreach/:id", patch(routes::automation::update_outreach))
        .route(
            "/api/outreach/:id/cancel",
            post(routes::automation::cancel_outreach),
        )
        .route(
            "/api/candidates/:id/conversation",
            get(routes::automation::get_conversation),
        )
        .route(
            "/api/candidates/:id/test-task/review",
            post(routes::automation::review_test_task),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_hr_or_admin,
        ));

    let public_api = Router::new()
        .route(
            "/api/public/questionnaire/:token",
            get(routes::public::get_questionnaire).post(routes::public::submit_questionnaire),
        )
        .route(
            "/api/public/test-task/:token",
            post(routes::public::submit_test_task),
        )
        .layer(axum::middleware::from_fn_with_state(
            rate_limit::RateLimiter::per_second(state.public_rps),
            rate_limit::limit_requests,
        ))
        .layer(public_cors());

    let system_api = Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/webhook/telegram", post(routes::telegram::handle_webhook))
        .route("/api/cron/:kind", post(routes::cron::run_cron));

    system_api
        .merge(operator_api)
        .merge(public_api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
