use std::time::Duration;

use error_stack::{Report, ResultExt};
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde::Serialize;

use crate::error::WebhookError;
use crate::model::Alert;

#[derive(Debug, Serialize)]
struct EmbedField {
    name: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct Embed {
    title: String,
    fields: Vec<EmbedField>,
}

#[derive(Debug, Serialize)]
struct WebhookBody {
    embeds: Vec<Embed>,
}

impl From<&Alert> for WebhookBody {
    fn from(alert: &Alert) -> Self {
        WebhookBody {
            embeds: vec![Embed {
                title: alert.message.clone(),
                fields: vec![
                    EmbedField {
                        name: "symbol".into(),
                        value: alert.symbol.clone(),
                    },
                    EmbedField {
                        name: "rule".into(),
                        value: alert.rule_type.to_string(),
                    },
                    EmbedField {
                        name: "price".into(),
                        value: format!("{:.4}", alert.price),
                    },
                    EmbedField {
                        name: "timestamp".into(),
                        value: alert.timestamp.to_rfc3339(),
                    },
                ],
            }],
        }
    }
}

/// Fans an accepted `Alert` out to every configured webhook URL. Each POST
/// is independently retried by the middleware; one URL's failure does not
/// block delivery to the others.
pub struct WebhookSender {
    client: ClientWithMiddleware,
    urls: Vec<String>,
}

impl WebhookSender {
    pub fn new(urls: Vec<String>, timeout: Duration, max_retries: u32) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);

        let inner = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        let client = ClientBuilder::new(inner)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Self { client, urls }
    }

    /// Sends `alert` to every configured URL, returning the URLs that
    /// failed after exhausting retries. Never aborts early on one failure.
    pub async fn send(&self, alert: &Alert) -> Vec<(String, Report<WebhookError>)> {
        let body = WebhookBody::from(alert);
        let mut failures = Vec::new();
        for url in &self.urls {
            if let Err(e) = self.post_one(url, &body).await {
                failures.push((url.clone(), e));
            }
        }
        failures
    }

    async fn post_one(&self, url: &str, body: &WebhookBody) -> Result<(), Report<WebhookError>> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .change_context(WebhookError::Request {
                url: url.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(Report::new(WebhookError::NonSuccess {
                url: url.to_string(),
            }));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RuleType;
    use chrono::Utc;
    use serde_json::json;

    fn sample_alert() -> Alert {
        Alert {
            id: uuid::Uuid::new_v4(),
            symbol: "BTCUSDT".into(),
            rule_type: RuleType::FuturesBigBull60,
            timestamp: Utc::now(),
            price: 42000.5,
            message: "BTCUSDT up 6.00% over 1h on 2.0x volume".into(),
            metadata: json!({}),
        }
    }

    #[test]
    fn embed_body_carries_core_fields() {
        let alert = sample_alert();
        let body = WebhookBody::from(&alert);
        assert_eq!(body.embeds.len(), 1);
        let field_names: Vec<&str> = body.embeds[0]
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert!(field_names.contains(&"symbol"));
        assert!(field_names.contains(&"rule"));
        assert!(field_names.contains(&"price"));
    }

    #[tokio::test]
    async fn no_urls_configured_sends_nothing_and_fails_nothing() {
        let sender = WebhookSender::new(vec![], Duration::from_secs(5), 3);
        let failures = sender.send(&sample_alert()).await;
        assert!(failures.is_empty());
    }

    #[tokio::test]
    async fn unreachable_url_is_reported_as_a_failure() {
        let sender = WebhookSender::new(
            vec!["http://127.0.0.1:1".to_string()],
            Duration::from_millis(200),
            0,
        );
        let failures = sender.send(&sample_alert()).await;
        assert_eq!(failures.len(), 1);
    }
}
