//! Poll cycles over the queues, triggered by the in-process scheduler or
//! the cron endpoints. Each pass handles its batch sequentially.

use std::str::FromStr;

use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::dto::cron_dto::{CronReport, ItemOutcome};
use crate::error::{Error, Result};
use crate::services::action_handlers::{ActionHandlers, HandlerOutcome};
use crate::services::analysis_service::AnalysisService;
use crate::services::automation_queue::AutomationQueue;
use crate::services::outreach_queue::OutreachQueueService;
use crate::services::questionnaire_service::QuestionnaireService;
use crate::services::test_task_service::TestTaskService;
use crate::services::ServiceContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CronKind {
    Automation,
    Outreach,
    Analysis,
    Maintenance,
}

impl FromStr for CronKind {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "automation" => Ok(CronKind::Automation),
            "outreach" => Ok(CronKind::Outreach),
            "analysis" => Ok(CronKind::Analysis),
            "maintenance" => Ok(CronKind::Maintenance),
            other => Err(Error::NotFound(format!("Unknown cron job `{}`", other))),
        }
    }
}

#[derive(Clone)]
pub struct CronService {
    ctx: ServiceContext,
    automation: AutomationQueue,
    handlers: ActionHandlers,
    outreach: OutreachQueueService,
    analysis: AnalysisService,
    questionnaires: QuestionnaireService,
    test_tasks: TestTaskService,
}

impl CronService {
    pub fn new(
        ctx: ServiceContext,
        automation: AutomationQueue,
        handlers: ActionHandlers,
        outreach: OutreachQueueService,
        analysis: AnalysisService,
        questionnaires: QuestionnaireService,
        test_tasks: TestTaskService,
    ) -> Self {
        Self {
            ctx,
            automation,
            handlers,
            outreach,
            analysis,
            questionnaires,
            test_tasks,
        }
    }

    pub async fn run(&self, kind: CronKind) -> Result<CronReport> {
        let report = match kind {
            CronKind::Automation => self.run_automation().await?,
            CronKind::Outreach => self.run_outreach().await?,
            CronKind::Analysis => self.run_analysis().await?,
            CronKind::Maintenance => self.run_maintenance().await?,
        };
        tracing::info!(
            ?kind,
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "Cron pass finished"
        );
        Ok(report)
    }

    /// Due automation jobs, oldest first. A job another poller claimed in
    /// the meantime counts as skipped.
    pub async fn run_automation(&self) -> Result<CronReport> {
        let mut report = CronReport::default();
        let due = self.automation.fetch_due(self.ctx.settings.batch_size).await?;
        for (i, job) in due.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.ctx.settings.item_delay).await;
            }
            let Some(job) = self.automation.mark_processing(job.id).await? else {
                report.record(ItemOutcome::Skipped);
                continue;
            };
            match self.handlers.dispatch(&job).await {
                Ok(outcome) => {
                    self.automation.mark_completed(job.id).await?;
                    report.record(match outcome {
                        HandlerOutcome::Completed => ItemOutcome::Succeeded,
                        HandlerOutcome::Skipped(_) => ItemOutcome::Skipped,
                    });
                }
                Err(e) => {
                    self.automation
                        .mark_failed(job.id, &e.to_string(), job.retry_count)
                        .await?;
                    report.record(ItemOutcome::Failed);
                }
            }
        }
        Ok(report)
    }

    pub async fn run_outreach(&self) -> Result<CronReport> {
        self.outreach
            .process_due(Utc::now(), self.ctx.settings.batch_size)
            .await
    }

    pub async fn run_analysis(&self) -> Result<CronReport> {
        self.analysis.process_batch(self.ctx.settings.batch_size).await
    }

    /// Expires overdue questionnaires, then runs the AI evaluation of
    /// submitted test tasks and completed questionnaires.
    pub async fn run_maintenance(&self) -> Result<CronReport> {
        let batch = self.ctx.settings.batch_size;
        let expired = self.questionnaires.expire_overdue(Utc::now()).await?;
        let mut report = self.test_tasks.evaluate_pending(batch).await?;
        report.absorb(self.questionnaires.evaluate_pending(batch).await?);
        for _ in 0..expired {
            report.record(ItemOutcome::Succeeded);
        }
        Ok(report)
    }
}

/// Registers one scheduler job per (kind, six-field cron expression) and
/// starts the scheduler.
pub async fn start_scheduler(
    cron: CronService,
    schedules: Vec<(CronKind, String)>,
) -> anyhow::Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    for (kind, expr) in schedules {
        let service = cron.clone();
        let job = Job::new_async(expr.as_str(), move |_uuid, _l| {
            let service = service.clone();
            Box::pin(async move {
                if let Err(e) = service.run(kind).await {
                    tracing::error!(?kind, error = %e, "Scheduled cron pass failed");
                }
            })
        })
        .with_context(|| format!("creating {:?} job for cron `{}`", kind, expr))?;
        sched.add(job).await.context("adding scheduler job")?;
        tracing::info!(?kind, cron = %expr, "Cron job scheduled");
    }
    sched.start().await.context("starting scheduler")?;
    Ok(sched)
}
