use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::types::Environment;
use crate::{Error, Result};

/// Lifecycle events announced to players.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Started,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
        }
    }
}

/// Channel that tells players a server changed state.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, server_name: &str, event: Event, env: &Environment) -> Result<()>;
}

/// Drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _server_name: &str, _event: Event, _env: &Environment) -> Result<()> {
        Ok(())
    }
}

/// Posts to the Discord webhook named in the environment, if there is one.
#[derive(Clone, Default)]
pub struct DiscordNotifier {
    http: reqwest::Client,
}

#[derive(Serialize)]
struct WebhookMessage {
    content: String,
}

impl DiscordNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(&self, server_name: &str, event: Event, env: &Environment) -> Result<()> {
        let Some(url) = env.discord_webhook.as_deref() else {
            debug!(server = server_name, "no discord webhook configured, skipping");
            return Ok(());
        };

        let resp = self
            .http
            .post(url)
            .json(&WebhookMessage {
                content: format!("{server_name} has been {}", event.as_str()),
            })
            .send()
            .await
            .map_err(|e| Error::Notify(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Notify(format!("discord returned {status}: {body}")));
        }

        info!(server = server_name, event = event.as_str(), "discord notified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discord_without_webhook_is_a_noop() {
        let env = Environment::default();
        DiscordNotifier::new()
            .notify("kf", Event::Started, &env)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn discord_posts_event_to_webhook() {
        use wiremock::matchers::{body_json, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/webhooks/1/abc"))
            .and(body_json(serde_json::json!({ "content": "Killing Floor has been started" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let env = Environment {
            discord_webhook: Some(format!("{}/api/webhooks/1/abc", server.uri())),
            ..Environment::default()
        };
        DiscordNotifier::new()
            .notify("Killing Floor", Event::Started, &env)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn discord_error_status_is_reported() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;

        let env = Environment {
            discord_webhook: Some(server.uri()),
            ..Environment::default()
        };
        let err = DiscordNotifier::new()
            .notify("kf", Event::Started, &env)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Notify(ref msg) if msg.contains("401")));
    }

    #[test]
    fn event_names() {
        assert_eq!(Event::Started.as_str(), "started");
    }
}
