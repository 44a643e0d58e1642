//! Outbound probe mail via the Mailgun HTTP API

use chrono::Utc;
use reqwest::StatusCode;

use crate::config::MailgunConfig;
use crate::error::SendError;
use crate::status::probe_subject;

const PROBE_BODY: &str = "This message is used to check end-to-end mail delivery.";

/// Sends timestamped probe messages through Mailgun
#[derive(Debug, Clone)]
pub struct MailSender {
    http: reqwest::Client,
    config: MailgunConfig,
}

impl MailSender {
    #[must_use]
    pub fn new(config: MailgunConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v3/{}/messages",
            self.config.api_base.trim_end_matches('/'),
            self.config.domain
        )
    }

    fn form(&self, sent_at: i64) -> [(&'static str, String); 4] {
        [
            ("from", format!("Mailgun <mailgun@{}>", self.config.domain)),
            ("to", self.config.to.clone()),
            ("subject", probe_subject(sent_at)),
            ("text", PROBE_BODY.to_string()),
        ]
    }

    /// Send one probe message stamped with the current time
    ///
    /// No retry within a single attempt; the send loop counts and logs a
    /// failure and carries on with its next tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport call fails or the provider responds
    /// with anything other than HTTP 200.
    pub async fn send_probe(&self) -> Result<(), SendError> {
        let response = self
            .http
            .post(self.endpoint())
            .basic_auth("api", Some(&self.config.api_key))
            .form(&self.form(Utc::now().timestamp()))
            .send()
            .await?;

        if response.status() == StatusCode::OK {
            Ok(())
        } else {
            Err(SendError::Status(response.status()))
        }
    }
}
