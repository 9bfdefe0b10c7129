//! Catalog API client for the home page widget
//!
//! Picks a random track from the user's liked tracks and returns the oEmbed
//! HTML for it. Two calls to the library endpoint (one for the total, one for
//! the chosen offset) plus one oEmbed lookup.

use rand::RngExt;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("catalog request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("catalog returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Deserialize)]
struct SavedTracksPage {
    total: u64,
    #[serde(default)]
    items: Vec<SavedTrack>,
}

#[derive(Debug, Deserialize)]
struct SavedTrack {
    track: Track,
}

#[derive(Debug, Deserialize)]
struct Track {
    external_urls: ExternalUrls,
}

#[derive(Debug, Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OEmbed {
    html: String,
}

#[derive(Clone)]
pub struct CatalogClient {
    client: reqwest::Client,
    api_base_url: String,
    oembed_url: String,
}

impl CatalogClient {
    pub fn new(client: reqwest::Client, api_base_url: String, oembed_url: String) -> Self {
        Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            oembed_url,
        }
    }

    /// Embed HTML for a random liked track, or `None` when the library is empty.
    pub async fn lucky_track_embed(
        &self,
        access_token: &str,
    ) -> Result<Option<String>, CatalogError> {
        let first = self.saved_tracks(access_token, 0).await?;
        if first.total == 0 {
            return Ok(None);
        }

        let offset = rand::rng().random_range(0..first.total);
        let page = if offset == 0 {
            first
        } else {
            self.saved_tracks(access_token, offset).await?
        };

        let Some(url) = page
            .items
            .into_iter()
            .next()
            .and_then(|item| item.track.external_urls.spotify)
        else {
            return Ok(None);
        };

        let response = self
            .client
            .get(&self.oembed_url)
            .query(&[("url", url.as_str())])
            .send()
            .await?;
        let embed: OEmbed = check_status(response).await?.json().await?;
        Ok(Some(embed.html))
    }

    async fn saved_tracks(
        &self,
        access_token: &str,
        offset: u64,
    ) -> Result<SavedTracksPage, CatalogError> {
        let response = self
            .client
            .get(format!("{}/me/tracks", self.api_base_url))
            .bearer_auth(access_token)
            .query(&[("limit", 1), ("offset", offset)])
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CatalogError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CatalogError::Status {
        status: status.as_u16(),
        body,
    })
}
