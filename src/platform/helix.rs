use super::{
    Conduit, CreateOutcome, Page, PlatformApi, Shard, ShardAssignment, ShardError, ShardUpdate,
    Subscription, SubscriptionFilter, SubscriptionRequest,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.twitch.tv/helix";

/// `{"data": [...]}` envelope with optional cursor pagination.
#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: Vec<T>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Default, Deserialize)]
struct Pagination {
    #[serde(default)]
    cursor: Option<String>,
}

impl<T> DataEnvelope<T> {
    fn into_page(self) -> Page<T> {
        Page {
            data: self.data,
            cursor: self.pagination.and_then(|p| p.cursor),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ShardUpdateEnvelope {
    #[serde(default)]
    data: Vec<Shard>,
    #[serde(default)]
    errors: Vec<ShardError>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// HTTP client for the Helix EventSub endpoints.
///
/// Authenticates with an app access token and the matching client id.
pub struct HelixClient {
    client_id: String,
    access_token: String,
    http_client: Client,
    base_url: String,
}

impl HelixClient {
    /// Create a client against the public Helix API.
    pub fn new(client_id: String, access_token: String) -> Result<Self> {
        Self::with_base_url(
            client_id,
            access_token,
            DEFAULT_BASE_URL.to_string(),
            Duration::from_secs(10),
        )
    }

    /// Create a client with a custom base URL (for testing with a mock server).
    pub fn with_base_url(
        client_id: String,
        access_token: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent("eventsub/0.1")
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client_id,
            access_token,
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("Client-Id", &self.client_id)
            .bearer_auth(&self.access_token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn fetch_shard_page(
        &self,
        conduit_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page<Shard>> {
        let mut query = vec![("conduit_id", conduit_id)];
        if let Some(after) = cursor {
            query.push(("after", after));
        }

        let response = self
            .authed(self.http_client.get(self.url("/eventsub/conduits/shards")))
            .query(&query)
            .send()
            .await
            .context("Failed to send get_conduit_shards request")?;

        check_response_status(&response)?;
        let envelope = response
            .json::<DataEnvelope<Shard>>()
            .await
            .context("Failed to parse conduit shards response")?;
        Ok(envelope.into_page())
    }
}

#[async_trait]
impl PlatformApi for HelixClient {
    async fn create_conduits(&self, count: u32) -> Result<Vec<Conduit>> {
        let response = self
            .authed(self.http_client.post(self.url("/eventsub/conduits")))
            .json(&json!({ "shard_count": count }))
            .send()
            .await
            .context("Failed to send create_conduits request")?;

        check_response_status(&response)?;
        let envelope = response
            .json::<DataEnvelope<Conduit>>()
            .await
            .context("Failed to parse create conduits response")?;
        Ok(envelope.data)
    }

    async fn get_conduits(&self) -> Result<Vec<Conduit>> {
        let response = self
            .authed(self.http_client.get(self.url("/eventsub/conduits")))
            .send()
            .await
            .context("Failed to send get_conduits request")?;

        check_response_status(&response)?;
        let envelope = response
            .json::<DataEnvelope<Conduit>>()
            .await
            .context("Failed to parse conduits response")?;
        Ok(envelope.data)
    }

    async fn get_conduit_shards(&self, conduit_id: &str) -> Result<Vec<Shard>> {
        let mut shards = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self.fetch_shard_page(conduit_id, cursor.as_deref()).await?;
            shards.extend(page.data);
            match page.cursor.filter(|c| !c.is_empty()) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(shards)
    }

    async fn update_conduit_shards(
        &self,
        conduit_id: &str,
        assignments: &[ShardAssignment],
    ) -> Result<ShardUpdate> {
        let response = self
            .authed(self.http_client.patch(self.url("/eventsub/conduits/shards")))
            .json(&json!({ "conduit_id": conduit_id, "shards": assignments }))
            .send()
            .await
            .context("Failed to send update_conduit_shards request")?;

        check_response_status(&response)?;
        let envelope = response
            .json::<ShardUpdateEnvelope>()
            .await
            .context("Failed to parse shard update response")?;
        Ok(ShardUpdate {
            shards: envelope.data,
            errors: envelope.errors,
        })
    }

    async fn create_subscription(&self, request: &SubscriptionRequest) -> Result<CreateOutcome> {
        let response = self
            .authed(self.http_client.post(self.url("/eventsub/subscriptions")))
            .json(request)
            .send()
            .await
            .context("Failed to send create_subscription request")?;

        let status = response.status();
        if !status.is_success() {
            // Structured rejections (409 duplicate, 400 bad condition, 403 missing
            // authorization) are reported as values.
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.message)
                .unwrap_or(body);
            return Ok(CreateOutcome::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let envelope = response
            .json::<DataEnvelope<Subscription>>()
            .await
            .context("Failed to parse create subscription response")?;
        envelope
            .data
            .into_iter()
            .next()
            .map(CreateOutcome::Created)
            .ok_or_else(|| anyhow!("Create subscription response contained no subscription"))
    }

    async fn get_subscriptions_page(
        &self,
        filter: &SubscriptionFilter,
        cursor: Option<&str>,
    ) -> Result<Page<Subscription>> {
        // The endpoint accepts exactly one of status/type/user_id; the most
        // selective one is sent and the rest is matched client-side.
        let mut query: Vec<(&str, &str)> = match (&filter.subject, &filter.event_type) {
            (Some(subject), _) => vec![("user_id", subject.as_str())],
            (None, Some(ty)) => vec![("type", ty.as_str())],
            (None, None) => vec![("status", filter.status.as_wire())],
        };
        if let Some(after) = cursor {
            query.push(("after", after));
        }

        let response = self
            .authed(self.http_client.get(self.url("/eventsub/subscriptions")))
            .query(&query)
            .send()
            .await
            .context("Failed to send get_subscriptions request")?;

        check_response_status(&response)?;
        let envelope = response
            .json::<DataEnvelope<Subscription>>()
            .await
            .context("Failed to parse subscriptions response")?;
        Ok(envelope.into_page())
    }
}

/// Check the response status and map known error codes to descriptive errors.
///
/// - 401 → auth error (app token expired or invalid)
/// - 429 → rate limit (reports Ratelimit-Reset)
/// - Other non-2xx → generic API error
fn check_response_status(response: &reqwest::Response) -> Result<()> {
    match response.status() {
        StatusCode::UNAUTHORIZED => Err(anyhow!("Helix auth error: token expired or invalid")),
        StatusCode::TOO_MANY_REQUESTS => {
            let reset = response
                .headers()
                .get("Ratelimit-Reset")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0);
            Err(anyhow!(
                "Helix rate limit exceeded (Ratelimit-Reset: {})",
                reset
            ))
        }
        s if !s.is_success() => Err(anyhow!("Helix API error: {}", s)),
        _ => Ok(()),
    }
}
