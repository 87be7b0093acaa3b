//! Job status notifications

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Started,
    Completed,
    Failed,
}

/// Payload sent on every status change of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobNotification {
    pub job_id: String,
    pub project_id: String,
    pub parcel_id: String,
    pub status: JobStatus,
    /// Error text for failed jobs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl JobNotification {
    pub fn new(job_id: &str, project_id: &str, parcel_id: &str, status: JobStatus) -> Self {
        JobNotification {
            job_id: job_id.to_string(),
            project_id: project_id.to_string(),
            parcel_id: parcel_id.to_string(),
            status,
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &JobNotification) -> Result<()>;
}

/// Notifier that only writes to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, n: &JobNotification) -> Result<()> {
        match n.status {
            JobStatus::Failed => log::error!(
                "Job {} (project {}, parcel {}) failed: {}",
                n.job_id,
                n.project_id,
                n.parcel_id,
                n.message.as_deref().unwrap_or("unknown error")
            ),
            status => log::info!(
                "Job {} (project {}, parcel {}) {:?}",
                n.job_id,
                n.project_id,
                n.parcel_id,
                status
            ),
        }
        Ok(())
    }
}

#[cfg(feature = "webhook")]
pub use webhook::WebhookNotifier;

#[cfg(feature = "webhook")]
mod webhook {
    use std::time::Duration;

    use reqwest::blocking::Client;
    use url::Url;

    use super::{JobNotification, Notifier};
    use crate::error::{Error, Result};

    /// POSTs each notification as JSON to a fixed URL
    #[derive(Debug, Clone)]
    pub struct WebhookNotifier {
        client: Client,
        url: Url,
    }

    impl WebhookNotifier {
        pub fn new(url: Url) -> Result<Self> {
            let client = Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .map_err(|e| Error::Notification(format!("Failed to create HTTP client: {}", e)))?;
            Ok(WebhookNotifier { client, url })
        }

        pub fn url(&self) -> &Url {
            &self.url
        }
    }

    impl Notifier for WebhookNotifier {
        fn notify(&self, notification: &JobNotification) -> Result<()> {
            log::debug!(
                "Posting {:?} notification for job {} to {}",
                notification.status,
                notification.job_id,
                self.url
            );
            let response = self
                .client
                .post(self.url.clone())
                .json(notification)
                .send()
                .map_err(|e| Error::Notification(format!("Webhook request failed: {}", e)))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().unwrap_or_default();
                return Err(Error::Notification(format!(
                    "Webhook returned {}: {}",
                    status, body
                )));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let n = JobNotification::new("job-1", "proj", "parcel", JobStatus::Failed)
            .with_message("boom");
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["job_id"], "job-1");
        assert_eq!(value["message"], "boom");
        assert!(value["timestamp"].is_string());

        let started = JobNotification::new("job-1", "proj", "parcel", JobStatus::Started);
        let value = serde_json::to_value(&started).unwrap();
        assert!(value.get("message").is_none());
    }

    #[test]
    fn test_log_notifier_never_fails() {
        let n = JobNotification::new("job-1", "proj", "parcel", JobStatus::Completed);
        assert!(LogNotifier.notify(&n).is_ok());
    }

    #[cfg(feature = "webhook")]
    #[test]
    fn test_unreachable_webhook_is_notification_error() {
        let url = url::Url::parse("http://127.0.0.1:9/hook").unwrap();
        let notifier = WebhookNotifier::new(url).unwrap();
        let n = JobNotification::new("job-1", "proj", "parcel", JobStatus::Started);
        assert!(matches!(
            notifier.notify(&n),
            Err(crate::error::Error::Notification(_))
        ));
    }
}
