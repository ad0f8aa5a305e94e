//! AI scoring of candidates and request matching, drained by cron.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use uuid::Uuid;

use crate::dto::cron_dto::{CronReport, ItemOutcome};
use crate::error::{Error, Result};
use crate::models::analysis::AnalysisJob;
use crate::models::automation_job::ActionType;
use crate::models::candidate::{Candidate, CandidatePatch, CandidateSource, OutreachStatus};
use crate::models::candidate_match::CandidateRequestMatch;
use crate::models::pipeline::PipelineEvent;
use crate::services::automation_queue::{failure_transition, AutomationQueue, MAX_RETRIES};
use crate::services::llm_service::{Prompt, PromptKind};
use crate::services::outreach_queue::OutreachQueueService;
use crate::services::outreach_scheduler::{calculate_scheduled_time, determine_delivery_method};
use crate::services::ServiceContext;
use crate::utils::ai_json::{parse_analysis, parse_match};

const ANALYSIS_SYSTEM: &str = "Ти досвідчений HR-аналітик компанії Vamos. Проаналізуй резюме кандидата. \
Поверни лише JSON: {\"score\": 1-10, \"category\": \"...\", \"summary\": \"...\", \
\"strengths\": [\"...\"], \"concerns\": [\"...\"], \"recommendation\": \"...\", \"reasoning\": \"...\"}.";

const MATCH_SYSTEM: &str = "Ти оцінюєш відповідність кандидата вакансії. \
Поверни лише JSON: {\"match_score\": 0-100, \"alignment\": \"...\", \"missing\": [\"...\"], \
\"recommendation\": \"...\"}.";

/// What happened to the candidate after scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoOutreach {
    NotEligible,
    Queued,
    Enqueued,
}

#[derive(Clone)]
pub struct AnalysisService {
    ctx: ServiceContext,
    automation: AutomationQueue,
    outreach: OutreachQueueService,
}

impl AnalysisService {
    pub fn new(ctx: ServiceContext, automation: AutomationQueue, outreach: OutreachQueueService) -> Self {
        Self {
            ctx,
            automation,
            outreach,
        }
    }

    /// False when an analysis for the candidate is already queued or running.
    pub async fn enqueue(&self, candidate_id: Uuid) -> Result<bool> {
        self.ctx.candidate(candidate_id).await?;
        if self.ctx.repos.analysis.find_active(candidate_id).await?.is_some() {
            return Ok(false);
        }
        let inserted = self
            .ctx
            .repos
            .analysis
            .insert(&AnalysisJob::pending(candidate_id))
            .await?;
        if let Some(job) = &inserted {
            tracing::info!(job_id = %job.id, %candidate_id, "Analysis job enqueued");
        }
        Ok(inserted.is_some())
    }

    pub async fn process_batch(&self, limit: i64) -> Result<CronReport> {
        let mut report = CronReport::default();
        let jobs = self.ctx.repos.analysis.claim_due(limit, MAX_RETRIES).await?;
        for (i, job) in jobs.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.ctx.settings.item_delay).await;
            }
            match self.analyze_candidate(job.candidate_id).await {
                Ok(_) => {
                    self.ctx.repos.analysis.complete(job.id).await?;
                    report.record(ItemOutcome::Succeeded);
                }
                Err(e) => {
                    let (retry_count, status) = failure_transition(job.retry_count);
                    tracing::error!(
                        job_id = %job.id,
                        candidate_id = %job.candidate_id,
                        retry_count,
                        error = %e,
                        "Analysis job failed"
                    );
                    self.ctx
                        .repos
                        .analysis
                        .record_failure(job.id, &e.to_string(), retry_count, status)
                        .await?;
                    report.record(ItemOutcome::Failed);
                }
            }
        }
        Ok(report)
    }

    /// Scores the resume, matches every active request and, when the
    /// thresholds are met, starts outreach.
    pub async fn analyze_candidate(&self, candidate_id: Uuid) -> Result<AutoOutreach> {
        let mut candidate = self.ctx.candidate(candidate_id).await?;
        let resume = candidate
            .resume_text
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| Error::Precondition(format!("Candidate {} has no resume text", candidate.id)))?
            .to_string();

        let prompt = Prompt::new(
            PromptKind::Analysis,
            ANALYSIS_SYSTEM,
            json!({ "full_name": candidate.full_name, "resume": resume }),
        );
        let analysis = parse_analysis(&self.ctx.llm.generate(&prompt).await?)?;

        let assessment = CandidatePatch {
            score: Some(analysis.score),
            category: Some(analysis.category),
            summary: Some(analysis.summary),
            strengths: Some(analysis.strengths),
            concerns: Some(analysis.concerns),
            recommendation: Some(analysis.recommendation),
            analyzed_at: Some(Utc::now()),
            ..CandidatePatch::default()
        };
        self.ctx.patch_candidate(candidate.id, assessment.clone()).await?;
        assessment.apply_to(&mut candidate);
        if let Some(stage) = self
            .ctx
            .advance_stage(candidate.id, candidate.pipeline_stage, PipelineEvent::AnalysisCompleted)
            .await?
        {
            candidate.pipeline_stage = stage;
        }
        tracing::info!(%candidate_id, score = analysis.score, "Candidate analyzed");

        let mut best: Option<CandidateRequestMatch> = None;
        for request in self.ctx.repos.requests.list_active().await? {
            let prompt = Prompt::new(
                PromptKind::Match,
                MATCH_SYSTEM,
                json!({
                    "candidate_summary": candidate.summary,
                    "strengths": candidate.strengths,
                    "resume": resume,
                    "request_title": request.title,
                    "request_description": request.description,
                    "skills": request.skills,
                }),
            );
            let result = parse_match(&self.ctx.llm.generate(&prompt).await?)?;
            let mut pairing = CandidateRequestMatch::new(candidate.id, request.id, result.match_score);
            pairing.explanation = Some(result.alignment);
            pairing.missing = result.missing;
            pairing.recommendation = Some(result.recommendation);
            let stored = self.ctx.repos.matches.upsert(&pairing).await?;
            tracing::debug!(%candidate_id, request_id = %request.id, match_score = stored.match_score, "Match stored");

            if best.as_ref().map_or(true, |b| stored.match_score > b.match_score) {
                best = Some(stored);
            }
        }

        match best {
            Some(best) => self.maybe_start_outreach(&candidate, &best).await,
            None => Ok(AutoOutreach::NotEligible),
        }
    }

    async fn maybe_start_outreach(
        &self,
        candidate: &Candidate,
        best: &CandidateRequestMatch,
    ) -> Result<AutoOutreach> {
        let settings = &self.ctx.settings;
        if candidate.score.unwrap_or(0) < settings.auto_outreach_min_score
            || best.match_score < settings.auto_outreach_min_match
            || candidate.outreach_status != OutreachStatus::Pending
        {
            return Ok(AutoOutreach::NotEligible);
        }
        let request = self.ctx.request(best.request_id).await?;
        let Some(template) = request.approved_template() else {
            tracing::info!(request_id = %request.id, "Outreach template not approved, skipping auto outreach");
            return Ok(AutoOutreach::NotEligible);
        };

        match candidate.source {
            CandidateSource::Warm => {
                let mut rng = StdRng::from_entropy();
                let scheduled_for =
                    calculate_scheduled_time(candidate.created_at, settings.timezone, &mut rng);
                let method = determine_delivery_method(
                    candidate.preferred_contact_methods.as_ref(),
                    candidate.telegram_handle(),
                );
                let message = template.replace("{name}", candidate.first_name());
                let subject = format!("Vamos: {}", request.title);
                self.outreach
                    .schedule(candidate.id, Some(request.id), method, Some(subject), message, scheduled_for)
                    .await?;
                Ok(AutoOutreach::Queued)
            }
            CandidateSource::Cold if candidate.telegram_chat_id.is_some() => {
                self.automation
                    .enqueue(ActionType::SendOutreach, candidate.id, request.id, None, None)
                    .await?;
                Ok(AutoOutreach::Enqueued)
            }
            CandidateSource::Cold => Ok(AutoOutreach::NotEligible),
        }
    }
}
