use anyhow::{Result, anyhow};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{error, info};

use super::{WeeklyReview, email_html, email_subject, slack_message};
use crate::core::dates::WeekWindow;
use crate::core::tracker::Tracker;

pub const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

/// One way of getting the digest to people.
#[async_trait::async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn name(&self) -> &'static str;

    /// The exact request body `deliver` would send.
    fn payload(&self, review: &WeeklyReview) -> Value;

    async fn deliver(&self, review: &WeeklyReview) -> Result<()>;
}

async fn post_json(request: reqwest::RequestBuilder, body: &Value) -> Result<()> {
    let res = request.json(body).send().await?;
    if res.status().is_success() {
        Ok(())
    } else {
        let status = res.status();
        let text = res.text().await.unwrap_or_default();
        Err(anyhow!("HTTP {}: {}", status, text))
    }
}

pub struct SlackWebhook {
    url: String,
    client: reqwest::Client,
}

impl SlackWebhook {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl DeliveryChannel for SlackWebhook {
    fn name(&self) -> &'static str {
        "slack"
    }

    fn payload(&self, review: &WeeklyReview) -> Value {
        slack_message(review)
    }

    async fn deliver(&self, review: &WeeklyReview) -> Result<()> {
        post_json(self.client.post(&self.url), &self.payload(review)).await
    }
}

pub struct ResendEmail {
    api_key: String,
    from: String,
    to: String,
    display_name: String,
    base_url: String,
    endpoint: String,
    client: reqwest::Client,
}

impl ResendEmail {
    pub fn new(
        api_key: impl Into<String>,
        email_domain: &str,
        to: impl Into<String>,
        display_name: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let display_name = display_name.into();
        Self {
            api_key: api_key.into(),
            from: format!("{} <noreply@{}>", display_name, email_domain),
            to: to.into(),
            display_name,
            base_url: base_url.into(),
            endpoint: RESEND_ENDPOINT.to_string(),
            client: reqwest::Client::new(),
        }
    }

    #[cfg(test)]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait::async_trait]
impl DeliveryChannel for ResendEmail {
    fn name(&self) -> &'static str {
        "email"
    }

    fn payload(&self, review: &WeeklyReview) -> Value {
        json!({
            "from": self.from,
            "to": [self.to],
            "subject": email_subject(review),
            "html": email_html(review, &self.display_name, &self.base_url),
        })
    }

    async fn deliver(&self, review: &WeeklyReview) -> Result<()> {
        let request = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key));
        post_json(request, &self.payload(review)).await
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelOutcome {
    pub channel: &'static str,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewRun {
    pub window: WeekWindow,
    pub dry_run: bool,
    pub review: WeeklyReview,
    pub outcomes: Vec<ChannelOutcome>,
}

impl ReviewRun {
    pub fn all_delivered(&self) -> bool {
        self.outcomes.iter().all(|o| o.delivered)
    }
}

/// Collects the digest and pushes it through every configured channel.
pub struct ReviewService {
    tracker: Tracker,
    channels: Vec<Arc<dyn DeliveryChannel>>,
}

impl ReviewService {
    pub fn new(tracker: Tracker, channels: Vec<Arc<dyn DeliveryChannel>>) -> Self {
        Self { tracker, channels }
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    pub async fn run(&self, window: WeekWindow, dry_run: bool) -> Result<ReviewRun> {
        let review = self.tracker.weekly_review(window).await?;
        info!(
            "Weekly review {}..{}: {} broadcasts, {} recordings, {} tasks",
            window.start,
            window.end,
            review.broadcasts.len(),
            review.recordings.len(),
            review.tasks.len()
        );

        let mut outcomes = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            if dry_run {
                outcomes.push(ChannelOutcome {
                    channel: channel.name(),
                    delivered: false,
                    error: None,
                    payload: Some(channel.payload(&review)),
                });
                continue;
            }
            let outcome = match channel.deliver(&review).await {
                Ok(()) => {
                    info!("Weekly review sent via {}", channel.name());
                    ChannelOutcome {
                        channel: channel.name(),
                        delivered: true,
                        error: None,
                        payload: None,
                    }
                }
                Err(e) => {
                    error!("Weekly review via {} failed: {}", channel.name(), e);
                    ChannelOutcome {
                        channel: channel.name(),
                        delivered: false,
                        error: Some(e.to_string()),
                        payload: None,
                    }
                }
            };
            outcomes.push(outcome);
        }

        Ok(ReviewRun {
            window,
            dry_run,
            review,
            outcomes,
        })
    }
}
