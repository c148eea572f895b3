//! Webhook subscription management on the chat platform
//!
//! Subscriptions are created under the app-level credential and deliver
//! events to an HTTPS callback. All calls go through the dispatcher, so a
//! revoked app token is refreshed and retried transparently.

use crate::dispatch::{DispatchError, Dispatcher, RequestEnvelope};
use reqwest::Url;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

/// How events for a subscription are delivered
#[derive(Clone, Debug, Deserialize)]
pub struct SubscriptionTransport {
    /// Delivery method, `webhook` for everything this crate creates
    pub method: String,
    /// The HTTPS callback receiving events
    pub callback: String,
}

/// One registered event subscription
#[derive(Clone, Debug, Deserialize)]
pub struct Subscription {
    /// Upstream-assigned subscription ID
    pub id: String,
    /// The event type subscribed to
    #[serde(rename = "type")]
    pub kind: String,
    /// Upstream verification status
    pub status: String,
    /// Cost this subscription counts against the app's limit
    #[serde(default)]
    pub cost: u64,
    /// Delivery transport
    pub transport: SubscriptionTransport,
}

#[derive(Debug, Deserialize)]
struct SubscriptionPage {
    data: Vec<Subscription>,
}

/// An error raised while managing subscriptions
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// The underlying request failed
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The upstream answer did not parse as a subscription document
    #[error("malformed subscription response")]
    Malformed(#[source] reqwest::Error),

    /// A broadcaster-scoped call was made with no broadcaster configured
    #[error("no broadcaster configured for a broadcaster-scoped subscription")]
    NoBroadcaster,

    /// The upstream accepted the request but returned no subscription
    #[error("upstream returned an empty subscription document")]
    Empty,
}

/// Manages event subscriptions through the dispatcher
#[derive(Clone, Debug)]
pub struct SubscriptionClient {
    api_url: Url,
    dispatcher: Arc<Dispatcher>,
    broadcaster: Option<String>,
}

impl SubscriptionClient {
    /// Constructs a client rooted at the subscription API endpoint
    pub fn new(api_url: Url, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            api_url,
            dispatcher,
            broadcaster: None,
        }
    }

    /// Sets the broadcaster user ID used by broadcaster-scoped subscriptions
    ///
    /// Typically the `app_id` from [`ChatSettings`](crate::config::ChatSettings).
    pub fn with_broadcaster(mut self, broadcaster_id: impl Into<String>) -> Self {
        self.broadcaster = Some(broadcaster_id.into());
        self
    }

    /// Registers a webhook subscription conditioned on the configured
    /// broadcaster
    pub async fn create_for_broadcaster(
        &self,
        kind: &str,
        callback: &str,
        secret: &str,
    ) -> Result<Subscription, SubscriptionError> {
        let broadcaster = self
            .broadcaster
            .as_deref()
            .ok_or(SubscriptionError::NoBroadcaster)?;
        let condition = serde_json::json!({ "broadcaster_user_id": broadcaster });
        self.create(kind, condition, callback, secret).await
    }

    /// Registers a webhook subscription for `kind` events
    pub async fn create(
        &self,
        kind: &str,
        condition: serde_json::Value,
        callback: &str,
        secret: &str,
    ) -> Result<Subscription, SubscriptionError> {
        let body = serde_json::json!({
            "type": kind,
            "version": "1",
            "condition": condition,
            "transport": {
                "method": "webhook",
                "callback": callback,
                "secret": secret,
            },
        });

        let envelope = RequestEnvelope::post(self.api_url.clone()).with_json(body);
        let response = self.dispatcher.send(&envelope).await?;
        let page: SubscriptionPage = response.json().await.map_err(SubscriptionError::Malformed)?;
        let subscription = page
            .data
            .into_iter()
            .next()
            .ok_or(SubscriptionError::Empty)?;
        tracing::info!(
            id = %subscription.id,
            kind = %subscription.kind,
            status = %subscription.status,
            "created subscription"
        );
        Ok(subscription)
    }

    /// Deletes the subscription with the given ID
    pub async fn delete(&self, id: &str) -> Result<(), SubscriptionError> {
        let mut url = self.api_url.clone();
        url.query_pairs_mut().append_pair("id", id);
        let envelope = RequestEnvelope::delete(url);
        self.dispatcher.send(&envelope).await?;
        tracing::info!(id, "deleted subscription");
        Ok(())
    }

    /// Lists all subscriptions currently registered for the app
    pub async fn list(&self) -> Result<Vec<Subscription>, SubscriptionError> {
        let envelope = RequestEnvelope::get(self.api_url.clone());
        let response = self.dispatcher.send(&envelope).await?;
        let page: SubscriptionPage = response.json().await.map_err(SubscriptionError::Malformed)?;
        Ok(page.data)
    }
}
