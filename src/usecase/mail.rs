use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::usecase::contracts::MailTransport;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Mail request failed: {0}")]
    Request(String),
    #[error("Mail provider error ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
impl<T: MailTransport + ?Sized> MailTransport for Arc<T> {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        template: &str,
        data: &serde_json::Value,
    ) -> Result<(), MailError> {
        (**self).send(to, subject, template, data).await
    }
}

#[derive(Debug, Serialize)]
struct SendMailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    template: &'a str,
    data: &'a serde_json::Value,
}

/// Hands templated messages to an HTTP mail relay (`POST {base_url}/send`).
pub struct HttpMailTransport {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    from: String,
}

impl HttpMailTransport {
    pub fn new(
        base_url: String,
        api_key: String,
        from: String,
        timeout: Duration,
    ) -> Result<Self, MailError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MailError::Request(e.to_string()))?;

        tracing::info!(%base_url, %from, "HttpMailTransport created");

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            from,
        })
    }
}

#[async_trait]
impl MailTransport for HttpMailTransport {
    #[tracing::instrument(skip(self, data), fields(%to, %template))]
    async fn send(
        &self,
        to: &str,
        subject: &str,
        template: &str,
        data: &serde_json::Value,
    ) -> Result<(), MailError> {
        let url = format!("{}/send", self.base_url);
        tracing::debug!(%url, "sending mail request");

        let request = SendMailRequest {
            from: &self.from,
            to,
            subject,
            template,
            data,
        };

        let mut builder = self.http_client.post(&url).json(&request);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let response = builder.send().await.map_err(|e| {
            tracing::error!(error = %e, "failed to send request to mail provider");
            MailError::Request(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, %body, "mail provider rejected message");
            return Err(MailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(%status, "mail accepted by provider");
        Ok(())
    }
}

/// Logs messages instead of sending them. Used when no mail relay is configured.
pub struct LogMailTransport;

#[async_trait]
impl MailTransport for LogMailTransport {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        template: &str,
        data: &serde_json::Value,
    ) -> Result<(), MailError> {
        tracing::info!(%to, %subject, %template, %data, "mail transport disabled, message logged");
        Ok(())
    }
}
