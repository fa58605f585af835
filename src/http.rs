//! HTTP fetcher returning decoded JSON bodies.

use color_eyre::{eyre::eyre, Result};
use futures::FutureExt;
use serde_json::Value;
use std::sync::Arc;
use url::Url;

use crate::fetcher::Fetcher;
use crate::key::FetchArgs;

/// Fetcher that GETs the key (or the first positional argument) as a URL and
/// decodes the response body as JSON.
pub fn json_fetcher(client: reqwest::Client) -> Fetcher<Value> {
  Arc::new(move |args: FetchArgs| {
    let client = client.clone();
    async move {
      let url = request_url(&args)?;
      get_json(&client, url).await
    }
    .boxed()
  })
}

fn request_url(args: &FetchArgs) -> Result<Url> {
  let raw = args
    .as_str()
    .ok_or_else(|| eyre!("Fetch arguments carry no URL: {:?}", args))?;
  Url::parse(raw).map_err(|e| eyre!("Invalid URL '{}': {}", raw, e))
}

async fn get_json(client: &reqwest::Client, url: Url) -> Result<Value> {
  tracing::debug!(%url, "GET");

  let response = client
    .get(url.clone())
    .send()
    .await
    .map_err(|e| eyre!("Request to {} failed: {}", url, e))?;

  let status = response.status();
  if !status.is_success() {
    return Err(eyre!("Request to {} returned {}", url, status));
  }

  let body = response
    .bytes()
    .await
    .map_err(|e| eyre!("Failed to read response from {}: {}", url, e))?;

  serde_json::from_slice(&body).map_err(|e| eyre!("Response from {} is not JSON: {}", url, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_request_url_from_key() {
    let url = request_url(&FetchArgs::Key("https://example.com/items?page=2".into())).unwrap();
    assert_eq!(url.query(), Some("page=2"));
  }

  #[test]
  fn test_request_url_from_args() {
    let args = FetchArgs::Args(vec![json!("https://example.com/items"), json!(3)]);
    assert_eq!(request_url(&args).unwrap().path(), "/items");
  }

  #[test]
  fn test_request_url_rejects_non_urls() {
    assert!(request_url(&FetchArgs::Key("not a url".into())).is_err());
    assert!(request_url(&FetchArgs::Args(vec![json!(7)])).is_err());
  }
}
