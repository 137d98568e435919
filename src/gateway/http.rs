//! HTTP plumbing shared by the chat adapter and the RapidAPI client.

use std::borrow::Cow;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Response};

use super::error::ProviderError;

/// Characters of a response body kept in error messages and logs.
pub(crate) const PREVIEW_CHARS: usize = 500;

pub(crate) fn header_value(what: &str, value: &str) -> Result<HeaderValue, ProviderError> {
    HeaderValue::from_str(value).map_err(|_| ProviderError::config(format!("invalid {what}")))
}

pub(crate) fn build_client(timeout: Duration, headers: HeaderMap) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .gzip(true)
        .build()
        .map_err(|e| ProviderError::config(format!("failed to create HTTP client: {e}")))
}

pub(crate) fn send_error(
    provider: &'static str,
    after: Duration,
    err: reqwest::Error,
) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout { provider, after }
    } else {
        ProviderError::Http(err)
    }
}

/// Read the body chunk by chunk, giving up once it exceeds `limit` bytes.
/// The bytes come back exactly as received.
pub(crate) async fn read_body(
    provider: &'static str,
    timeout: Duration,
    response: &mut Response,
    limit: usize,
) -> Result<Vec<u8>, ProviderError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| send_error(provider, timeout, e))?
    {
        if bytes.len() + chunk.len() > limit {
            return Err(ProviderError::malformed(
                provider,
                format!("response larger than {limit} bytes"),
            ));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

/// Body as text for parsing and messages. Invalid UTF-8 becomes U+FFFD here
/// only; stored bodies keep the original bytes.
pub(crate) fn body_text(body: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(body)
}

pub(crate) fn preview(body: &str) -> String {
    body.chars().take(PREVIEW_CHARS).collect()
}
