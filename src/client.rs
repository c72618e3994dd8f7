//! HTTP client for the SIRENE establishment endpoint.

use crate::config::ApiConfig;
use crate::traits::{CatalogClient, FetchError, Page};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

const API_KEY_HEADER: &str = "X-INSEE-Api-Key-Integration";

pub struct SireneClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl SireneClient {
    /// Builds a client from explicit API settings; nothing is read from the
    /// process environment.
    pub fn new(config: &ApiConfig) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| FetchError::Request(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    /// Filter selecting establishments whose legal unit has this APE code.
    pub fn query_for(partition: &str) -> String {
        format!("activitePrincipaleUniteLegale:{partition}")
    }
}

fn classify_status(status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        None
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        Some(FetchError::RateLimited)
    } else if status == StatusCode::GATEWAY_TIMEOUT || status == StatusCode::REQUEST_TIMEOUT {
        Some(FetchError::Timeout)
    } else {
        Some(FetchError::Request(format!("HTTP {status}")))
    }
}

fn classify_transport(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Request(e.to_string())
    }
}

#[async_trait]
impl CatalogClient for SireneClient {
    async fn fetch_page(
        &self,
        partition: &str,
        cursor: &str,
        page_size: usize,
    ) -> Result<Page, FetchError> {
        let page_size = page_size.to_string();
        let response = self
            .http
            .get(&self.base_url)
            .header(API_KEY_HEADER, &self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[
                ("q", Self::query_for(partition).as_str()),
                ("nombre", page_size.as_str()),
                ("curseur", cursor),
            ])
            .send()
            .await
            .map_err(classify_transport)?;

        if let Some(err) = classify_status(response.status()) {
            return Err(err);
        }

        let page: Page = response.json().await.map_err(classify_transport)?;
        debug!(partition, cursor, records = page.records.len(), "Page received");
        Ok(page)
    }
}
