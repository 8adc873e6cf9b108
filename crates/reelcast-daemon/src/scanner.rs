//! Catalog feed client

use anyhow::{Context, Result};
use async_trait::async_trait;
use reelcast_proto::config::CatalogConfig;
use reelcast_proto::protocol::{FeedResponse, ItemDescriptor};
use tracing::debug;

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Candidates for one category, in feed order.
    async fn scan(&self, category: &str) -> Result<Vec<ItemDescriptor>>;

    /// Raw poster bytes, used as the document thumbnail.
    async fn fetch_poster(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct FeedScanner {
    client: reqwest::Client,
    base_url: String,
    categories: Vec<String>,
    sort_by: String,
    limit: u32,
}

impl FeedScanner {
    pub fn new(cfg: &CatalogConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("reelcast/", env!("CARGO_PKG_VERSION")))
            .timeout(cfg.request_timeout())
            .danger_accept_invalid_certs(cfg.accept_invalid_certs)
            .build()
            .context("Failed to build feed HTTP client")?;

        Ok(Self {
            client,
            base_url: cfg.base_url.clone(),
            categories: cfg.categories.clone(),
            sort_by: cfg.sort_by.clone(),
            limit: cfg.limit,
        })
    }
}

#[async_trait]
impl Catalog for FeedScanner {
    async fn scan(&self, category: &str) -> Result<Vec<ItemDescriptor>> {
        if !self.categories.iter().any(|c| c == category) {
            anyhow::bail!("Unknown category: {}", category);
        }

        let limit = self.limit.to_string();
        let response = self
            .client
            .get(&self.base_url)
            .header("Accept", "application/json")
            .query(&[
                ("genre", category),
                ("sort_by", self.sort_by.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await
            .context("Failed to fetch catalog feed")?;

        if !response.status().is_success() {
            anyhow::bail!("Catalog feed returned status: {}", response.status());
        }

        let feed: FeedResponse = response
            .json()
            .await
            .context("Failed to parse catalog feed")?;
        let items = feed.into_items()?;
        debug!("feed: {} -> {} candidates", category, items.len());
        Ok(items)
    }

    async fn fetch_poster(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to fetch poster")?;

        if !response.status().is_success() {
            anyhow::bail!("Poster fetch returned status: {}", response.status());
        }

        Ok(response
            .bytes()
            .await
            .context("Failed to read poster data")?
            .to_vec())
    }
}
