//! One executor per automation action type.
//!
//! Every handler loads the candidate and request, checks its preconditions
//! and the pipeline transition, sends at most one message, then writes the
//! candidate once and appends one conversation entry.

use chrono::Utc;
use serde_json::json;

use crate::dto::callback_dto::CallbackPayload;
use crate::dto::telegram_dto::InlineKeyboardMarkup;
use crate::error::{Error, Result};
use crate::models::automation_job::{ActionType, AutomationJob};
use crate::models::candidate::{Candidate, CandidatePatch, OutreachStatus, QuestionnaireStatus};
use crate::models::conversation::MessageType;
use crate::models::hiring_request::HiringRequest;
use crate::models::pipeline::{PipelineEvent, PipelineStage};
use crate::services::llm_service::{Prompt, PromptKind};
use crate::services::questionnaire_service::QuestionnaireService;
use crate::services::test_task_service::{SendOutcome, TestTaskService};
use crate::services::ServiceContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Completed,
    /// Nothing to do; the job still completes.
    Skipped(&'static str),
}

pub const INVITE_MESSAGE: &str = "Вітаємо! Дякуємо за виконане завдання та час, який ви приділили \
нашому відбору. Ми раді запросити вас на співбесіду з командою Vamos. \
Найближчим часом рекрутер зв'яжеться з вами, щоб узгодити зручний час.";

pub const REJECTION_MESSAGE: &str = "Дякуємо за ваш інтерес до Vamos та час, приділений відбору. \
На жаль, цього разу ми вирішили продовжити з іншими кандидатами. \
Бажаємо успіхів і будемо раді бачити вас серед кандидатів у майбутньому.";

pub fn outreach_keyboard(candidate: &Candidate, request: &HiringRequest) -> InlineKeyboardMarkup {
    let reply = |interested| CallbackPayload::OutreachReply {
        interested,
        candidate_id: candidate.id,
        request_id: request.id,
    };
    InlineKeyboardMarkup::single_row(vec![
        reply(true).button("Так, цікаво"),
        reply(false).button("Ні, дякую"),
    ])
}

#[derive(Clone)]
pub struct ActionHandlers {
    ctx: ServiceContext,
    questionnaires: QuestionnaireService,
    test_tasks: TestTaskService,
}

impl ActionHandlers {
    pub fn new(
        ctx: ServiceContext,
        questionnaires: QuestionnaireService,
        test_tasks: TestTaskService,
    ) -> Self {
        Self {
            ctx,
            questionnaires,
            test_tasks,
        }
    }

    pub async fn dispatch(&self, job: &AutomationJob) -> Result<HandlerOutcome> {
        let outcome = match job.action_type {
            ActionType::SendOutreach => self.send_outreach(job).await?,
            ActionType::SendQuestionnaire => self.send_questionnaire(job).await?,
            ActionType::SendTestTask => self.send_test_task(job).await?,
            ActionType::SendInvite | ActionType::SendRejection => self.send_decision(job).await?,
        };
        tracing::info!(
            job_id = %job.id,
            candidate_id = %job.candidate_id,
            action_type = %job.action_type,
            outcome = ?outcome,
            "Automation action handled"
        );
        Ok(outcome)
    }

    async fn load(&self, job: &AutomationJob) -> Result<(Candidate, HiringRequest)> {
        let candidate = self.ctx.candidate(job.candidate_id).await?;
        let request = self.ctx.request(job.request_id).await?;
        Ok((candidate, request))
    }

    async fn send_outreach(&self, job: &AutomationJob) -> Result<HandlerOutcome> {
        let (candidate, request) = self.load(job).await?;
        if candidate.outreach_sent_at.is_some()
            || matches!(
                candidate.outreach_status,
                OutreachStatus::Sent | OutreachStatus::Responded | OutreachStatus::Declined
            )
        {
            return Ok(HandlerOutcome::Skipped("outreach already sent"));
        }

        let chat_id = candidate.telegram_chat_id.ok_or_else(|| {
            Error::Precondition(format!(
                "Candidate {} has no Telegram chat id; automated outreach needs an established chat",
                candidate.id
            ))
        })?;
        let template = request.approved_template().ok_or_else(|| {
            Error::Precondition(format!(
                "Request {} has no approved outreach template",
                request.id
            ))
        })?;
        candidate.pipeline_stage.apply(PipelineEvent::OutreachSent)?;

        let fallback = template.replace("{name}", candidate.first_name());
        let prompt = Prompt::new(
            PromptKind::OutreachPersonalization,
            "Ти рекрутер компанії Vamos. Персоналізуй шаблон першого повідомлення кандидату. \
             Збережи зміст і тон шаблону, звертайся на ім'я, без емодзі, українською.",
            json!({
                "template": template,
                "first_name": candidate.first_name(),
                "request_title": request.title,
                "candidate_summary": candidate.summary,
            }),
        );
        let text = self.ctx.llm.generate_or(&prompt, fallback, 20).await;

        let keyboard = outreach_keyboard(&candidate, &request);
        let sent = self
            .ctx
            .messenger
            .send_message(chat_id, &text, Some(&keyboard))
            .await?;

        self.ctx
            .patch_candidate(
                candidate.id,
                CandidatePatch {
                    outreach_status: Some(OutreachStatus::Sent),
                    outreach_sent_at: Some(Utc::now()),
                    outreach_message_id: Some(sent.message_id),
                    ..CandidatePatch::default()
                },
            )
            .await?;
        self.ctx
            .advance_stage(candidate.id, candidate.pipeline_stage, PipelineEvent::OutreachSent)
            .await?;

        self.ctx
            .conversations
            .log_outbound(
                candidate.id,
                Some(request.id),
                MessageType::Outreach,
                &text,
                json!({ "job_id": job.id, "message_id": sent.message_id }),
            )
            .await?;
        Ok(HandlerOutcome::Completed)
    }

    async fn send_questionnaire(&self, job: &AutomationJob) -> Result<HandlerOutcome> {
        let (candidate, request) = self.load(job).await?;
        if matches!(
            candidate.questionnaire_status,
            Some(QuestionnaireStatus::Sent | QuestionnaireStatus::InProgress | QuestionnaireStatus::Completed)
        ) {
            return Ok(HandlerOutcome::Skipped("questionnaire already sent"));
        }
        candidate
            .pipeline_stage
            .apply(PipelineEvent::QuestionnaireSent)?;

        // a retry after a failed send reuses the link created last time
        let response = self.questionnaires.open_or_create(&candidate, &request).await?;
        let url = self.questionnaires.access_url(&response.token);
        let text = format!(
            "{}, дякуємо за інтерес до вакансії «{}»! Будь ласка, заповніть коротку анкету: {}\n\
             Посилання дійсне 5 днів.",
            candidate.first_name(),
            request.title,
            url
        );

        let mut metadata = json!({
            "job_id": job.id,
            "questionnaire_id": response.id,
            "expires_at": response.expires_at,
            "delivered": false,
        });
        if let Some(chat_id) = candidate.telegram_chat_id {
            let sent = self.ctx.messenger.send_message(chat_id, &text, None).await?;
            metadata["delivered"] = json!(true);
            metadata["message_id"] = json!(sent.message_id);
        }

        self.ctx
            .patch_candidate(
                candidate.id,
                CandidatePatch {
                    questionnaire_status: Some(QuestionnaireStatus::Sent),
                    ..CandidatePatch::default()
                },
            )
            .await?;
        self.ctx
            .advance_stage(candidate.id, candidate.pipeline_stage, PipelineEvent::QuestionnaireSent)
            .await?;

        self.ctx
            .conversations
            .log_outbound(
                candidate.id,
                Some(request.id),
                MessageType::Questionnaire,
                &text,
                metadata,
            )
            .await?;
        Ok(HandlerOutcome::Completed)
    }

    async fn send_test_task(&self, job: &AutomationJob) -> Result<HandlerOutcome> {
        match self
            .test_tasks
            .send(job.candidate_id, job.request_id)
            .await?
        {
            SendOutcome::Sent { .. } => Ok(HandlerOutcome::Completed),
            SendOutcome::AlreadySent { .. } => Ok(HandlerOutcome::Skipped("test task already sent")),
            SendOutcome::AlreadySubmitted => {
                Ok(HandlerOutcome::Skipped("test task already submitted"))
            }
            SendOutcome::Duplicate => Ok(HandlerOutcome::Skipped("test task send in progress")),
        }
    }

    async fn send_decision(&self, job: &AutomationJob) -> Result<HandlerOutcome> {
        let (candidate, request) = self.load(job).await?;
        let (target, text, decision) = match job.action_type {
            ActionType::SendInvite => (PipelineStage::Interview, INVITE_MESSAGE, "invite"),
            _ => (PipelineStage::Rejected, REJECTION_MESSAGE, "reject"),
        };
        if candidate.pipeline_stage == target {
            return Ok(HandlerOutcome::Skipped("decision already delivered"));
        }
        let event = job.action_type.pipeline_event();
        candidate.pipeline_stage.apply(event)?;

        let mut metadata = json!({ "job_id": job.id, "decision": decision, "delivered": false });
        if let Some(chat_id) = candidate.telegram_chat_id {
            let sent = self.ctx.messenger.send_message(chat_id, text, None).await?;
            metadata["delivered"] = json!(true);
            metadata["message_id"] = json!(sent.message_id);
        }

        self.ctx
            .advance_stage(candidate.id, candidate.pipeline_stage, event)
            .await?;

        self.ctx
            .conversations
            .log_outbound(
                candidate.id,
                Some(request.id),
                MessageType::Decision,
                text,
                metadata,
            )
            .await?;
        Ok(HandlerOutcome::Completed)
    }
}
