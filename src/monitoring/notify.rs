// File: src/monitoring/notify.rs
// Alert delivery collaborators
//
// The threshold monitor only knows the `AlertNotifier` trait. Delivery is
// fire-and-forget: failures are logged as warnings and never reach the
// code path that raised the alert.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ThresholdConfig;
use crate::error::{PerfError, PerfResult};
use crate::monitoring::thresholds::UsageAlert;

/// Outbound channel for usage alerts
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(&self, alert: &UsageAlert) -> PerfResult<()>;
}

/// Writes alerts to the tracing log only
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl AlertNotifier for LogNotifier {
    async fn notify(&self, alert: &UsageAlert) -> PerfResult<()> {
        tracing::warn!(
            alert_id = %alert.id,
            kind = %alert.kind,
            severity = %alert.severity,
            current_value = alert.current_value,
            threshold = alert.threshold,
            "{}",
            alert.message
        );
        Ok(())
    }
}

/// POSTs the alert JSON to a webhook
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AlertNotifier for WebhookNotifier {
    async fn notify(&self, alert: &UsageAlert) -> PerfResult<()> {
        let response = self
            .client
            .post(&self.url)
            .json(alert)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| PerfError::Notify(e.to_string()))?;

        if response.status().is_success() {
            tracing::info!(webhook_url = %self.url, alert_id = %alert.id, "Usage alert webhook sent");
            Ok(())
        } else {
            let status = response.status();
            Err(PerfError::Notify(format!(
                "HTTP {}: {}",
                status,
                response.text().await.unwrap_or_default()
            )))
        }
    }
}

/// Pick the notifier implied by config: webhook when a URL is set, log otherwise
pub fn notifier_from_config(config: &ThresholdConfig) -> Arc<dyn AlertNotifier> {
    match &config.webhook_url {
        Some(url) => {
            tracing::info!(webhook_url = %url, "Usage alert webhook enabled");
            Arc::new(WebhookNotifier::new(url.clone()))
        }
        None => {
            tracing::debug!("No alert webhook configured; alerts go to the log");
            Arc::new(LogNotifier)
        }
    }
}

/// Deliver without blocking the caller. Outside a tokio runtime the alert
/// is logged instead.
pub(crate) fn dispatch(notifier: Arc<dyn AlertNotifier>, alert: UsageAlert) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = notifier.notify(&alert).await {
                    tracing::warn!(
                        alert_id = %alert.id,
                        kind = %alert.kind,
                        error = %e,
                        "Failed to deliver usage alert (non-fatal)"
                    );
                }
            });
        }
        Err(_) => {
            tracing::warn!(
                alert_id = %alert.id,
                kind = %alert.kind,
                severity = %alert.severity,
                "No async runtime; usage alert not delivered: {}",
                alert.message
            );
        }
    }
}
