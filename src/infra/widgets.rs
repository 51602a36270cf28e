use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::config::AppConfig;

/// Display lists fetched from the two fixed auxiliary feeds.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Widgets {
    pub trending_results: Value,
    pub follow_results: Value,
}

#[derive(Clone)]
pub struct WidgetsClient {
    http: reqwest::Client,
    trending_url: Option<String>,
    follow_url: Option<String>,
}

impl WidgetsClient {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.widgets_timeout_seconds))
            .build()?;
        Ok(Self {
            http,
            trending_url: config.trending_url.clone(),
            follow_url: config.follow_url.clone(),
        })
    }

    /// A client that never leaves the process; both lists come back empty.
    pub fn disabled() -> Self {
        Self {
            http: reqwest::Client::new(),
            trending_url: None,
            follow_url: None,
        }
    }

    /// Fetches both lists; a failing feed degrades to an empty list.
    pub async fn fetch(&self) -> Widgets {
        let (trending, follow) = tokio::join!(
            self.fetch_one(self.trending_url.as_deref()),
            self.fetch_one(self.follow_url.as_deref()),
        );
        Widgets {
            trending_results: trending,
            follow_results: follow,
        }
    }

    async fn fetch_one(&self, url: Option<&str>) -> Value {
        let Some(url) = url else {
            return Value::Array(Vec::new());
        };
        match self.get_json(url).await {
            Ok(value) => value,
            Err(err) => {
                warn!(error = ?err, url, "failed to fetch widget feed");
                Value::Array(Vec::new())
            }
        }
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let value = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_client_returns_empty_lists() {
        let widgets = WidgetsClient::disabled().fetch().await;
        assert_eq!(widgets.trending_results, Value::Array(Vec::new()));
        assert_eq!(widgets.follow_results, Value::Array(Vec::new()));
    }
}
