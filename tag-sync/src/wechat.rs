//! WeChat official-account tag API client.
//!
//! Each configured `app_id` is one namespace. Access tokens are cached per
//! account and refreshed five minutes before WeChat expires them.

use crate::config::{AccountConfig, WeChatConfig};
use crate::error::{TagSyncError, TagSyncResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::counter;
use reconcile::{AdapterError, RemoteEntity, RemoteSource};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// A user tag as WeChat reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeChatTag {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub count: u64
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
    #[serde(flatten)]
    status: ApiStatus
}

#[derive(Debug, Deserialize)]
struct TagListResponse {
    tags: Option<Vec<WeChatTag>>,
    #[serde(flatten)]
    status: ApiStatus
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>
}

pub struct WeChatClient {
    client: Client,
    base_url: String,
    secrets: HashMap<String, String>,
    tokens: DashMap<String, CachedToken>
}

impl WeChatClient {
    pub fn new(config: &WeChatConfig, accounts: &[AccountConfig]) -> TagSyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(TagSyncError::HttpError)?;

        let secrets = accounts
            .iter()
            .map(|account| (account.app_id.clone(), account.app_secret.clone()))
            .collect();

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secrets,
            tokens: DashMap::new()
        })
    }

    pub fn has_account(&self, app_id: &str) -> bool {
        self.secrets.contains_key(app_id)
    }

    /// Lists all tags of an account, refreshing the token once if WeChat
    /// reports it invalid.
    pub async fn list_tags(&self, app_id: &str) -> TagSyncResult<Vec<WeChatTag>> {
        let token = self.access_token(app_id).await?;
        match self.fetch_tags(&token).await {
            Err(e) if e.is_token_invalid() => {
                warn!(app_id = %app_id, error = %e, "Access token rejected, refreshing");
                self.invalidate_token(app_id);
                let token = self.access_token(app_id).await?;
                self.fetch_tags(&token).await
            }
            result => result
        }
    }

    pub fn invalidate_token(&self, app_id: &str) {
        self.tokens.remove(app_id);
    }

    async fn access_token(&self, app_id: &str) -> TagSyncResult<String> {
        if let Some(cached) = self.tokens.get(app_id) {
            if cached.expires_at > Utc::now() + chrono::Duration::minutes(5) {
                return Ok(cached.token.clone());
            }
        }

        let secret = self
            .secrets
            .get(app_id)
            .ok_or_else(|| TagSyncError::UnknownAccount(app_id.to_string()))?;

        let url = format!("{}/cgi-bin/token", self.base_url);
        debug!(app_id = %app_id, "Requesting WeChat access token");

        let response: TokenResponse = self
            .get_json(
                &url,
                &[
                    ("grant_type", "client_credential"),
                    ("appid", app_id),
                    ("secret", secret.as_str())
                ],
                "token"
            )
            .await?;
        check_status(&response.status, "token")?;

        let token = response.access_token.ok_or_else(|| {
            TagSyncError::MalformedResponse("token response without access_token".to_string())
        })?;
        let expires_at = Utc::now() + chrono::Duration::seconds(response.expires_in.unwrap_or(7200));

        self.tokens.insert(
            app_id.to_string(),
            CachedToken {
                token: token.clone(),
                expires_at
            }
        );
        counter!("tag_sync_token_refreshes_total").increment(1);

        Ok(token)
    }

    async fn fetch_tags(&self, token: &str) -> TagSyncResult<Vec<WeChatTag>> {
        let url = format!("{}/cgi-bin/tags/get", self.base_url);
        let response: TagListResponse = self
            .get_json(&url, &[("access_token", token)], "tags")
            .await?;
        check_status(&response.status, "tags")?;

        response.tags.ok_or_else(|| {
            TagSyncError::MalformedResponse("tag list response without tags".to_string())
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        endpoint: &'static str
    ) -> TagSyncResult<T> {
        let url = reqwest::Url::parse_with_params(url, query)
            .map_err(|e| TagSyncError::ConfigError(format!("Invalid WeChat URL: {}", e)))?;
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            counter!("tag_sync_wechat_errors_total", "endpoint" => endpoint).increment(1);
            let message = response.text().await.unwrap_or_default();
            return Err(TagSyncError::HttpStatus {
                status: status.as_u16(),
                message
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| TagSyncError::MalformedResponse(format!("{} response: {}", endpoint, e)))
    }
}

fn check_status(status: &ApiStatus, endpoint: &'static str) -> TagSyncResult<()> {
    if status.errcode == 0 {
        return Ok(());
    }
    counter!("tag_sync_wechat_errors_total", "endpoint" => endpoint).increment(1);
    Err(TagSyncError::WeChatApi {
        errcode: status.errcode,
        errmsg: status.errmsg.clone()
    })
}

#[async_trait]
impl RemoteSource<i32, String> for WeChatClient {
    async fn fetch_all(
        &self,
        namespace: &str
    ) -> Result<Vec<RemoteEntity<i32, String>>, AdapterError> {
        let tags = self.list_tags(namespace).await?;
        Ok(tags
            .into_iter()
            .map(|tag| RemoteEntity::new(namespace, tag.id, tag.name))
            .collect())
    }
}
