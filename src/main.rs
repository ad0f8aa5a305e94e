use std::net::SocketAddr;
use std::time::Duration;

use reqwest::Client;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vamos_recruitment::{
    config::{get_config, init_config},
    database::pool::{create_pool, run_migrations},
    router,
    services::{
        cron_service::{start_scheduler, CronKind},
        telegram_service::TelegramGateway,
    },
    AppState,
};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_config()?;
    init_tracing();
    let config = get_config();

    let pool = create_pool(&config.database_url).await?;
    run_migrations(&pool).await?;

    let app_state = AppState::new(pool, config)?;
    info!(llm_mode = ?config.llm_mode, timezone = %config.company_timezone, "Automation core initialized");

    {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        let telegram = TelegramGateway::new(client, config.telegram_bot_token.clone());
        let target_webhook_url = format!(
            "{}/api/webhook/telegram",
            config.webapp_url.trim_end_matches('/')
        );
        info!("Checking Telegram webhook status...");
        if let Err(e) = telegram
            .ensure_webhook(&target_webhook_url, config.telegram_webhook_secret.as_deref())
            .await
        {
            tracing::warn!(error = %e, "Could not register Telegram webhook");
        }
    }

    let _scheduler = if config.scheduler_enabled {
        let schedules = vec![
            (CronKind::Automation, config.automation_cron.clone()),
            (CronKind::Outreach, config.outreach_cron.clone()),
            (CronKind::Analysis, config.analysis_cron.clone()),
            (CronKind::Maintenance, config.maintenance_cron.clone()),
        ];
        Some(start_scheduler(app_state.cron.clone(), schedules).await?)
    } else {
        info!("In-process scheduler disabled, relying on /api/cron endpoints");
        None
    };

    let app = router(app_state);

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
