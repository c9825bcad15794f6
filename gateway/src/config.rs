//! Gateway runtime configuration, loaded from environment variables at
//! process start. Every field has a sane default so the gateway boots
//! without any env vars set, matching the original's `Settings` defaults.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnforcementMode {
    Enforce,
    Warn,
    LogOnly,
}

impl EnforcementMode {
    fn from_env(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "warn" => EnforcementMode::Warn,
            "log_only" | "log-only" | "logonly" => EnforcementMode::LogOnly,
            _ => EnforcementMode::Enforce,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AiProvider {
    OpenAi,
    Azure,
}

impl AiProvider {
    fn from_env(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "azure" => AiProvider::Azure,
            _ => AiProvider::OpenAi,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub ai_provider: AiProvider,

    pub openai_api_key: String,

    pub azure_openai_endpoint: String,
    pub azure_openai_api_key: String,
    pub azure_openai_deployment: String,
    pub azure_openai_api_version: String,

    pub default_model: String,
    pub audit_service_url: String,

    pub pii_detection_enabled: bool,

    pub policy_file: Option<std::path::PathBuf>,
    pub policy_hot_reload: bool,
    pub enforcement_mode: EnforcementMode,

    pub alert_slack_webhook: Option<String>,
    pub alert_email_enabled: bool,
    pub alert_email_smtp_host: String,
    pub alert_email_smtp_port: u16,
    pub alert_email_smtp_user: Option<String>,
    pub alert_email_smtp_password: Option<String>,
    pub alert_email_from: String,
    pub alert_email_to: Vec<String>,

    pub port: u16,
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_var(key).unwrap_or_else(|| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_var(key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

impl Settings {
    /// Build settings from the process environment. Malformed numeric
    /// fields fall back to their default rather than panicking at startup.
    pub fn from_env() -> Self {
        let alert_email_to = env_var("ALERT_EMAIL_TO")
            .map(|raw| raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        Self {
            ai_provider: AiProvider::from_env(&env_or("AI_PROVIDER", "openai")),
            openai_api_key: env_or("OPENAI_API_KEY", ""),
            azure_openai_endpoint: env_or("AZURE_OPENAI_ENDPOINT", ""),
            azure_openai_api_key: env_or("AZURE_OPENAI_API_KEY", ""),
            azure_openai_deployment: env_or("AZURE_OPENAI_DEPLOYMENT", ""),
            azure_openai_api_version: env_or("AZURE_OPENAI_API_VERSION", "2024-02-15-preview"),
            default_model: env_or("DEFAULT_MODEL", "gpt-4o"),
            audit_service_url: env_or("AUDIT_SERVICE_URL", "http://localhost:8001"),
            pii_detection_enabled: env_bool("PII_DETECTION_ENABLED", true),
            policy_file: env_var("POLICY_FILE").map(std::path::PathBuf::from),
            policy_hot_reload: env_bool("POLICY_HOT_RELOAD", true),
            enforcement_mode: EnforcementMode::from_env(&env_or("ENFORCEMENT_MODE", "enforce")),
            alert_slack_webhook: env_var("ALERT_SLACK_WEBHOOK"),
            alert_email_enabled: env_bool("ALERT_EMAIL_ENABLED", false),
            alert_email_smtp_host: env_or("ALERT_EMAIL_SMTP_HOST", ""),
            alert_email_smtp_port: env_var("ALERT_EMAIL_SMTP_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(587),
            alert_email_smtp_user: env_var("ALERT_EMAIL_SMTP_USER"),
            alert_email_smtp_password: env_var("ALERT_EMAIL_SMTP_PASSWORD"),
            alert_email_from: env_or("ALERT_EMAIL_FROM", ""),
            alert_email_to,
            port: env_var("PORT").and_then(|v| v.parse().ok()).unwrap_or(8000),
        }
    }
}
