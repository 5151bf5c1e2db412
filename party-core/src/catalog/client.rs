//! Movie catalog HTTP client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::CatalogConfig;

use super::types::*;

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur when talking to the catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Movie not found: {0}")]
    NotFound(String),

    #[error("API error: {0}")]
    Api(String),
}

/// Movie lookup the coordinator depends on
#[async_trait]
pub trait MovieCatalog: Send + Sync {
    async fn movie_detail(&self, slug: &str) -> Result<MovieDetail, CatalogError>;
}

/// Client for the catalog's REST API
#[derive(Debug, Clone)]
pub struct CatalogClient {
    http: Client,
    base_url: String,
}

impl CatalogClient {
    pub fn new(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let http = Client::builder()
            .connect_timeout(CONNECTION_TIMEOUT.min(config.timeout))
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn detail_url(&self, slug: &str) -> String {
        format!("{}/v1/api/phim/{}", self.base_url, slug)
    }
}

#[async_trait]
impl MovieCatalog for CatalogClient {
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn movie_detail(&self, slug: &str) -> Result<MovieDetail, CatalogError> {
        let slug = slug.trim();
        if slug.is_empty() {
            return Err(CatalogError::NotFound(String::new()));
        }

        let resp = self.http.get(self.detail_url(slug)).send().await.map_err(|e| {
            warn!("Catalog request failed: {:?}", e);
            CatalogError::Http(e)
        })?;

        debug!("Response status: {}", resp.status());

        match resp.status() {
            StatusCode::NOT_FOUND => return Err(CatalogError::NotFound(slug.to_string())),
            status if !status.is_success() => {
                return Err(CatalogError::Api(format!(
                    "Unexpected response (HTTP {})",
                    status.as_u16()
                )))
            }
            _ => {}
        }

        let body: ApiResponse<DetailData> = resp.json().await?;
        match body.data {
            Some(data) => Ok(data.item),
            None => Err(CatalogError::Api(
                body.msg.unwrap_or_else(|| format!("No detail for {}", slug)),
            )),
        }
    }
}
