use std::{env, time::Duration};

use crate::llm::GEMINI_BASE_URL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct VapidConfig {
    pub public_key: String,
    pub private_key: String,
    pub subject: String,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from: String,
}

/// Process configuration. Read once at startup and injected into `AppState`.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store: StoreBackend,
    pub database_url: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub ai_timeout: Duration,
    pub assistant_handle: String,
    pub assistant_name: String,
    pub history_limit: usize,
    pub grounding_limit: usize,
    pub vapid: Option<VapidConfig>,
    pub smtp: Option<SmtpConfig>,
    pub app_base_url: String,
    pub insight_window_hours: i64,
    pub insight_scan_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4000,
            store: StoreBackend::Memory,
            database_url: String::new(),
            gemini_api_key: None,
            gemini_model: "gemini-2.5-flash".to_string(),
            gemini_base_url: GEMINI_BASE_URL.to_string(),
            ai_timeout: Duration::from_secs(20),
            assistant_handle: "native".to_string(),
            assistant_name: "Native".to_string(),
            history_limit: 10,
            grounding_limit: 50,
            vapid: None,
            smtp: None,
            app_base_url: "http://localhost:3000".to_string(),
            insight_window_hours: 24,
            insight_scan_limit: 500,
        }
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    non_empty(key)
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}

fn resolve_database_url() -> String {
    if let Some(url) = non_empty("DATABASE_URL") {
        return url;
    }
    let host = env::var("POSTGRES_HOST")
        .or_else(|_| env::var("PGHOST"))
        .unwrap_or_else(|_| "localhost".to_string());
    let port = env::var("POSTGRES_PORT")
        .or_else(|_| env::var("PGPORT"))
        .unwrap_or_else(|_| "5432".to_string());
    let user = env::var("POSTGRES_USER")
        .or_else(|_| env::var("PGUSER"))
        .unwrap_or_else(|_| "postgres".to_string());
    let password = env::var("POSTGRES_PASSWORD")
        .or_else(|_| env::var("PGPASSWORD"))
        .unwrap_or_default();
    let db = env::var("POSTGRES_DB")
        .or_else(|_| env::var("PGDATABASE"))
        .unwrap_or_else(|_| "workspace".to_string());
    format!("postgres://{user}:{password}@{host}:{port}/{db}")
}

impl Config {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let defaults = Config::default();

        let store = match non_empty("WORKSPACE_STORE").as_deref() {
            Some("memory") => StoreBackend::Memory,
            _ => StoreBackend::Postgres,
        };

        let vapid = match (non_empty("VAPID_PUBLIC_KEY"), non_empty("VAPID_PRIVATE_KEY")) {
            (Some(public_key), Some(private_key)) => Some(VapidConfig {
                public_key,
                private_key,
                subject: non_empty("VAPID_SUBJECT")
                    .unwrap_or_else(|| "mailto:admin@example.com".to_string()),
            }),
            _ => None,
        };

        let smtp = match (non_empty("SMTP_USER"), non_empty("SMTP_PASS")) {
            (Some(user), Some(password)) => Some(SmtpConfig {
                host: non_empty("SMTP_HOST").unwrap_or_else(|| "smtp.gmail.com".to_string()),
                port: parsed("SMTP_PORT", 465u16),
                from: non_empty("SMTP_FROM").unwrap_or_else(|| format!("Native <{user}>")),
                user,
                password,
            }),
            _ => None,
        };

        Self {
            port: parsed("PORT", defaults.port),
            store,
            database_url: resolve_database_url(),
            gemini_api_key: non_empty("GEMINI_API_KEY"),
            gemini_model: non_empty("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            gemini_base_url: non_empty("GEMINI_BASE_URL").unwrap_or(defaults.gemini_base_url),
            ai_timeout: Duration::from_secs(parsed("AI_TIMEOUT_SECS", 20u64)),
            assistant_handle: non_empty("ASSISTANT_HANDLE")
                .map(|handle| handle.trim_start_matches('@').to_ascii_lowercase())
                .unwrap_or(defaults.assistant_handle),
            assistant_name: non_empty("ASSISTANT_NAME").unwrap_or(defaults.assistant_name),
            history_limit: defaults.history_limit,
            grounding_limit: defaults.grounding_limit,
            vapid,
            smtp,
            app_base_url: non_empty("APP_BASE_URL")
                .unwrap_or(defaults.app_base_url)
                .trim_end_matches('/')
                .to_string(),
            insight_window_hours: parsed("INSIGHT_WINDOW_HOURS", defaults.insight_window_hours),
            insight_scan_limit: parsed("INSIGHT_SCAN_LIMIT", defaults.insight_scan_limit),
        }
    }
}
