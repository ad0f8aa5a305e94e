use crate::error::{Error, Result};
use chrono_tz::Tz;
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub cron_secret: String,
    pub telegram_bot_token: String,
    pub telegram_bot_username: String,
    pub telegram_webhook_secret: Option<String>,
    pub webapp_url: String,
    pub llm_mode: LlmMode,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub company_timezone: Tz,
    pub automation_batch_size: i64,
    pub cron_item_delay_ms: u64,
    pub scheduler_enabled: bool,
    pub automation_cron: String,
    pub outreach_cron: String,
    pub analysis_cron: String,
    pub maintenance_cron: String,
    pub auto_outreach_min_score: i32,
    pub auto_outreach_min_match: i32,
    pub smtp: Option<SmtpConfig>,
    pub public_rps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmMode {
    Live,
    Mock,
}

impl std::str::FromStr for LlmMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(LlmMode::Live),
            "mock" => Ok(LlmMode::Mock),
            other => Err(format!("expected `live` or `mock`, got `{}`", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

/// Values the automation core needs at runtime. Built once from [`Config`]
/// and injected, so services never look at the process environment.
#[derive(Debug, Clone)]
pub struct AutomationSettings {
    pub base_url: String,
    pub timezone: Tz,
    pub bot_username: String,
    pub batch_size: i64,
    pub item_delay: Duration,
    pub auto_outreach_min_score: i32,
    pub auto_outreach_min_match: i32,
}

impl AutomationSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.webapp_url.trim_end_matches('/').to_string(),
            timezone: config.company_timezone,
            bot_username: config.telegram_bot_username.clone(),
            batch_size: config.automation_batch_size,
            item_delay: Duration::from_millis(config.cron_item_delay_ms),
            auto_outreach_min_score: config.auto_outreach_min_score,
            auto_outreach_min_match: config.auto_outreach_min_match,
        }
    }
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            timezone: chrono_tz::Europe::Kyiv,
            bot_username: "vamos_hr_bot".to_string(),
            batch_size: 10,
            item_delay: Duration::from_millis(500),
            auto_outreach_min_score: 7,
            auto_outreach_min_match: 70,
        }
    }
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let llm_mode: LlmMode = get_env_or("LLM_MODE", "live")
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for LLM_MODE: {}", e)))?;
        let openai_api_key = env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty());
        if llm_mode == LlmMode::Live && openai_api_key.is_none() {
            return Err(Error::Config(
                "OPENAI_API_KEY is required when LLM_MODE=live".to_string(),
            ));
        }

        let tz_name = get_env_or("COMPANY_TIMEZONE", "Europe/Kyiv");
        let company_timezone: Tz = tz_name
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for COMPANY_TIMEZONE: {}", e)))?;

        let webapp_url = get_env("WEBAPP_URL")?;
        let parsed = url::Url::parse(&webapp_url)
            .map_err(|e| Error::Config(format!("Invalid value for WEBAPP_URL: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Config(
                "WEBAPP_URL must be an http(s) URL".to_string(),
            ));
        }

        Ok(Self {
            server_address: get_env("SERVER_ADDRESS")?,
            database_url: get_env("DATABASE_URL")?,
            jwt_secret: get_env("JWT_SECRET")?,
            cron_secret: get_env("CRON_SECRET")?,
            telegram_bot_token: get_env("TELEGRAM_BOT_TOKEN")?,
            telegram_bot_username: get_env("TELEGRAM_BOT_USERNAME")?,
            telegram_webhook_secret: env::var("TELEGRAM_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            webapp_url,
            llm_mode,
            openai_api_key,
            openai_model: get_env_or("OPENAI_MODEL", "gpt-4o-mini"),
            company_timezone,
            automation_batch_size: get_env_parse_or("AUTOMATION_BATCH_SIZE", 10)?,
            cron_item_delay_ms: get_env_parse_or("CRON_ITEM_DELAY_MS", 500)?,
            scheduler_enabled: get_env_parse_or("SCHEDULER_ENABLED", true)?,
            automation_cron: get_env_or("AUTOMATION_CRON", "0 */5 * * * *"),
            outreach_cron: get_env_or("OUTREACH_CRON", "30 */5 * * * *"),
            analysis_cron: get_env_or("ANALYSIS_CRON", "0 * * * * *"),
            maintenance_cron: get_env_or("MAINTENANCE_CRON", "0 0 * * * *"),
            auto_outreach_min_score: get_env_parse_or("AUTO_OUTREACH_MIN_SCORE", 7)?,
            auto_outreach_min_match: get_env_parse_or("AUTO_OUTREACH_MIN_MATCH", 70)?,
            smtp: smtp_from_env()?,
            public_rps: get_env_parse_or("PUBLIC_RPS", 20)?,
        })
    }
}

fn smtp_from_env() -> Result<Option<SmtpConfig>> {
    let Ok(host) = env::var("SMTP_HOST") else {
        return Ok(None);
    };
    if host.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(SmtpConfig {
        host,
        port: get_env_parse_or("SMTP_PORT", 587)?,
        username: get_env("SMTP_USERNAME")?,
        password: get_env("SMTP_PASSWORD")?,
        from: get_env("SMTP_FROM")?,
    }))
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}
