//! HTTP plumbing shared by the fetchers.

mod basic;
mod client;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;

use crate::error::FetchError;
use serde_json::Value;
use tracing::debug;

/// Issues a GET for `url` with `params` appended to the query string and
/// decodes the body as JSON.
///
/// # Errors
///
/// Returns [`FetchError::Status`] for non-success responses,
/// [`FetchError::Transport`] when the request or body read fails, and
/// [`FetchError::Parse`] for an invalid URL or a non-JSON body.
pub async fn fetch_json<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
    params: &[(&str, String)],
) -> Result<Value, FetchError> {
    let mut url = reqwest::Url::parse(url).map_err(|e| FetchError::Parse(format!("{url}: {e}")))?;
    if !params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in params {
            pairs.append_pair(name, value);
        }
    }

    let req = reqwest::Request::new(reqwest::Method::GET, url);
    let resp = client.execute(req).await?;

    let status = resp.status();
    let url = resp.url().path().to_string();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(FetchError::Status { url, status, body });
    }

    let bytes = resp.bytes().await?;
    debug!(url, bytes = bytes.len(), "Response body received");
    serde_json::from_slice(&bytes).map_err(|e| FetchError::Parse(e.to_string()))
}
