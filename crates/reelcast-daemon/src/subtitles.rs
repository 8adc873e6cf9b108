//! Best-effort subtitle lookup. Nothing here can fail a delivery.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reelcast_proto::config::SubtitlesConfig;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

#[async_trait]
pub trait SubtitleProvider: Send + Sync {
    /// URL of a subtitle archive for `title`, if the service knows one.
    async fn find(&self, title: &str) -> Result<Option<String>>;
}

/// Drop `(YYYY)` groups and surrounding whitespace: `"Nova (2024)"` -> `"Nova"`.
pub fn clean_title(title: &str) -> String {
    static YEAR: OnceLock<Regex> = OnceLock::new();
    let re = YEAR.get_or_init(|| Regex::new(r"\(\d{4}\)").expect("valid year regex"));
    re.replace_all(title, "").trim().to_string()
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    url: String,
}

#[derive(Debug, Deserialize)]
struct DownloadResponse {
    #[serde(default, alias = "DOWN_URL")]
    download_url: Option<String>,
}

/// Client for a search service exposing `/search?q=` and `/download?url=`.
pub struct SubtitleSearch {
    client: reqwest::Client,
    base_url: String,
}

impl SubtitleSearch {
    /// `None` when disabled or no service is configured.
    pub fn from_config(cfg: &SubtitlesConfig) -> Result<Option<Self>> {
        if !cfg.enabled || cfg.base_url.trim().is_empty() {
            return Ok(None);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .context("Failed to build subtitle HTTP client")?;
        Ok(Some(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        }))
    }
}

#[async_trait]
impl SubtitleProvider for SubtitleSearch {
    async fn find(&self, title: &str) -> Result<Option<String>> {
        let search: SearchResponse = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[("q", clean_title(title))])
            .send()
            .await
            .context("Failed to search subtitles")?
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse subtitle search")?;

        let Some(first) = search.results.into_iter().next() else {
            return Ok(None);
        };

        let download: DownloadResponse = self
            .client
            .get(format!("{}/download", self.base_url))
            .query(&[("url", first.url)])
            .send()
            .await
            .context("Failed to resolve subtitle download")?
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse subtitle download")?;

        Ok(download.download_url.filter(|u| !u.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_clean_title_removes_year() {
        assert_eq!(clean_title("Nova (2024)"), "Nova");
        assert_eq!(clean_title("Quiet Hours"), "Quiet Hours");
        assert_eq!(clean_title("Blade (Director's Cut) (1998)"), "Blade (Director's Cut)");
    }

    #[test]
    fn test_disabled_config_has_no_provider() {
        assert!(SubtitleSearch::from_config(&SubtitlesConfig::default())
            .unwrap()
            .is_none());
        let cfg = SubtitlesConfig {
            enabled: true,
            base_url: String::new(),
        };
        assert!(SubtitleSearch::from_config(&cfg).unwrap().is_none());
    }

    fn provider(server: &MockServer) -> SubtitleSearch {
        let cfg = SubtitlesConfig {
            enabled: true,
            base_url: server.uri(),
        };
        SubtitleSearch::from_config(&cfg).unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_find_follows_first_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "Nova"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{"url": "https://subs/nova"}, {"url": "https://subs/other"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/download"))
            .and(query_param("url", "https://subs/nova"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "DOWN_URL": "https://subs/nova.zip"
            })))
            .mount(&server)
            .await;

        let found = provider(&server).find("Nova (2024)").await.unwrap();
        assert_eq!(found.as_deref(), Some("https://subs/nova.zip"));
    }

    #[tokio::test]
    async fn test_find_without_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"results": []})))
            .mount(&server)
            .await;

        assert_eq!(provider(&server).find("Nova").await.unwrap(), None);
    }
}
