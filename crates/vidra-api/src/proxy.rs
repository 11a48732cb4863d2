//! Outbound HTTP: descriptor links and the metadata-API proxies.

use anyhow::{Result, bail};
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use tracing::debug;

/// TMDB API root.
pub const TMDB_URL: &str = "https://api.themoviedb.org/3";
pub(crate) const TMDB_API_KEY: &str = "0f40d1e86cf9e24c0c9a6e4f1c0f4b1d";
/// Jackett API root.
pub const JACKETT_URL: &str = "http://localhost:9117";
pub(crate) const JACKETT_API_KEY: &str = "q3vw8c70lv1xygeh9f7v5v71a739u0re";

/// What a descriptor link resolved to.
pub enum LinkPayload {
    /// The link served `.torrent` bytes directly.
    Metainfo(Vec<u8>),
    /// The link redirected to a magnet URI.
    Magnet(String),
}

/// Build the outbound client: redirects are followed except onto `magnet:`
/// URIs, which are surfaced to the caller instead.
pub fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(Policy::custom(|attempt| {
            if attempt.url().scheme() == "magnet" {
                attempt.stop()
            } else {
                attempt.follow()
            }
        }))
        .build()
        .unwrap_or_default()
}

/// Fetch a descriptor link, honoring HTTP-to-magnet redirects.
///
/// # Errors
///
/// Fails on unparseable URLs, transport errors, and non-success statuses.
pub async fn fetch_descriptor(client: &reqwest::Client, link: &str) -> Result<LinkPayload> {
    let url = reqwest::Url::parse(link)?;
    let response = client.get(url).send().await?;

    if response.status().is_redirection() {
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if location.starts_with("magnet:") {
            debug!(magnet = %location, "descriptor link redirected to magnet");
            return Ok(LinkPayload::Magnet(location.to_string()));
        }
        bail!("unexpected redirect to {location:?}");
    }
    if !response.status().is_success() {
        bail!("expected 200 OK, got {}", response.status());
    }
    Ok(LinkPayload::Metainfo(response.bytes().await?.to_vec()))
}
