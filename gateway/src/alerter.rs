//! Alerter (C9): fans a Violation Event out to whichever sinks are
//! configured. Sinks run concurrently; one sink's failure never affects
//! another's, or the request.

use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

const ALERT_TIMEOUT: Duration = Duration::from_secs(10);

/// Transient record handed to the Alerter when a blocking or masking
/// decision is made. Never persisted; consumed only here.
#[derive(Debug, Clone, Serialize)]
pub struct ViolationEvent {
    pub violation_type: String,
    pub violations: Vec<String>,
    pub tenant_id: Option<String>,
    pub app_id: Option<String>,
    pub user_id: Option<String>,
    pub model: Option<String>,
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action_taken: String,
    pub severity: String,
}

/// SMTP credentials and destination for the email sink. Only constructed
/// (and therefore only enabled) when `from` and at least one `to` address
/// are populated.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub from: String,
    pub to: Vec<String>,
}

/// Fans out a `ViolationEvent` to a webhook and/or email sink.
pub struct Alerter {
    http: reqwest::Client,
    webhook_url: Option<String>,
    email: Option<EmailConfig>,
}

impl Alerter {
    pub fn new(webhook_url: Option<String>, email: Option<EmailConfig>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(ALERT_TIMEOUT)
                .build()
                .expect("reqwest client configuration is valid"),
            webhook_url,
            email,
        }
    }

    /// Send the violation via every configured sink concurrently. Never
    /// returns an error: each sink logs its own failure.
    pub async fn send_alert(&self, violation: &ViolationEvent) {
        let webhook = async {
            if self.webhook_url.is_some() {
                self.send_webhook(violation).await;
            }
        };
        let email = async {
            if self.email.is_some() {
                self.send_email(violation).await;
            }
        };
        tokio::join!(webhook, email);
    }

    async fn send_webhook(&self, violation: &ViolationEvent) {
        let Some(url) = &self.webhook_url else { return };
        let payload = json!({
            "title": format!("AI Compliance Alert: {}", violation.violation_type),
            "violations": violation.violations,
            "action_taken": violation.action_taken,
            "severity": violation.severity,
            "tenant_id": violation.tenant_id,
            "app_id": violation.app_id,
            "model": violation.model,
            "request_id": violation.request_id,
            "timestamp": violation.timestamp,
            "color": severity_color(&violation.severity),
        });

        match self.http.post(url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!(request_id = %violation.request_id, "webhook alert sent");
            }
            Ok(resp) => {
                error!(request_id = %violation.request_id, status = %resp.status(), "webhook alert rejected");
            }
            Err(e) => {
                error!(request_id = %violation.request_id, error = %e, "failed to send webhook alert");
            }
        }
    }

    /// Builds and sends a MIME multipart HTML email over authenticated SMTP
    /// with STARTTLS. The actual blocking SMTP conversation runs on a
    /// dedicated blocking thread so it never stalls the async runtime or the
    /// request-handling path that queued this alert.
    async fn send_email(&self, violation: &ViolationEvent) {
        let Some(config) = self.email.clone() else { return };
        let body = email_body(violation);
        let request_id = violation.request_id;

        let result = tokio::task::spawn_blocking(move || send_email_sync(&config, &body)).await;

        match result {
            Ok(Ok(())) => info!(request_id = %request_id, "email alert sent"),
            Ok(Err(e)) => error!(request_id = %request_id, error = %e, "failed to send email alert"),
            Err(e) => error!(request_id = %request_id, error = %e, "email alert task panicked"),
        }
    }
}

impl EmailConfig {
    /// Only enabled once `from` and at least one recipient are populated —
    /// matches the original's "enabled only if from+to populated" rule.
    pub fn is_usable(&self) -> bool {
        !self.from.is_empty() && !self.to.is_empty()
    }
}

fn severity_color(severity: &str) -> &'static str {
    match severity.to_ascii_lowercase().as_str() {
        "low" => "#36a64f",
        "medium" => "#ff9800",
        "high" => "#f44336",
        "critical" => "#9c27b0",
        _ => "#ff9800",
    }
}

fn email_body(violation: &ViolationEvent) -> String {
    format!(
        "<html><body><h2>AI Compliance Alert</h2><p>Type: {}</p><p>Violations: {}</p><p>Action: {}</p><p>Severity: {}</p><p>Request: {}</p></body></html>",
        violation.violation_type,
        violation.violations.join(", "),
        violation.action_taken,
        violation.severity,
        violation.request_id,
    )
}

/// Synchronous SMTP delivery, run inside `spawn_blocking`. Builds one MIME
/// HTML message and sends it over STARTTLS to every configured recipient in
/// a single envelope.
fn send_email_sync(config: &EmailConfig, body: &str) -> Result<(), String> {
    if !config.is_usable() {
        return Err("email sink not configured".to_string());
    }

    let mut builder = Message::builder()
        .from(config.from.parse().map_err(|e| format!("invalid from address: {e}"))?)
        .subject("AI Compliance Alert");
    for to in &config.to {
        builder = builder.to(to.parse().map_err(|e| format!("invalid to address {to:?}: {e}"))?);
    }
    let email = builder
        .header(ContentType::TEXT_HTML)
        .body(body.to_string())
        .map_err(|e| format!("failed to build message: {e}"))?;

    let mut transport = SmtpTransport::starttls_relay(&config.smtp_host)
        .map_err(|e| format!("invalid SMTP host {:?}: {e}", config.smtp_host))?
        .port(config.smtp_port);
    if let (Some(user), Some(password)) = (&config.smtp_user, &config.smtp_password) {
        transport = transport.credentials(Credentials::new(user.clone(), password.clone()));
    }
    let transport = transport.build();

    transport.send(&email).map_err(|e| format!("SMTP send failed: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_disabled_without_from_and_to() {
        let config = EmailConfig {
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 587,
            smtp_user: None,
            smtp_password: None,
            from: String::new(),
            to: vec![],
        };
        assert!(!config.is_usable());
    }

    #[test]
    fn severity_color_mapping() {
        assert_eq!(severity_color("critical"), "#9c27b0");
        assert_eq!(severity_color("unknown"), "#ff9800");
    }
}
