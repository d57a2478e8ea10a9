//! HTTP client for the WHIP/WHEP offer/answer exchange.
//!
//! Redirects are followed by hand so that every `Location:` header in the
//! chain is observed: servers are allowed to answer the POST with a
//! redirect, and the resource URL is derived from the *last* `Location:`
//! seen, resolved against the URL of the final request.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION, USER_AGENT};
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use log::debug;

use crate::error::NetworkError;
use crate::peer::PeerConnection;

/// Transport timeout for both the offer and the teardown request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);

/// Redirect chain bound, matching common client defaults.
const MAX_REDIRECTS: usize = 8;

/// Answer body and resource URL returned by a successful offer.
#[derive(Debug)]
pub struct OfferResponse {
    /// SDP answer, trimmed to begin at `v=0`
    pub answer_sdp: String,
    /// Absolute session resource URL for the teardown DELETE
    pub resource_url: String,
}

/// Descriptive user-agent sent on every signaling request.
pub fn user_agent() -> String {
    format!(
        "Mozilla/5.0 (studio-webrtc/{}; {} {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

fn https_client() -> Client<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>, Full<Bytes>>
{
    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();

    Client::builder(TokioExecutor::new()).build(https)
}

/// Exchange the local offer of `peer` against the endpoint and apply the
/// returned answer. Returns the session resource URL.
pub async fn send_offer(
    bearer_token: &str,
    endpoint_url: &str,
    peer: &PeerConnection,
) -> Result<String, NetworkError> {
    let offer_sdp = peer
        .offer()
        .await
        .map_err(|e| NetworkError::ConnectFailed(format!("failed to create local offer: {e}")))?;

    let response = post_offer(bearer_token, endpoint_url, &offer_sdp).await?;

    peer.apply_answer(response.answer_sdp)
        .await
        .map_err(|e| NetworkError::ConnectFailed(format!("failed to apply answer: {e}")))?;

    Ok(response.resource_url)
}

/// POST the SDP offer to the endpoint and return the answer plus the
/// session resource URL.
///
/// Expects `201 Created` with a non-empty SDP body. The bearer header is
/// preserved across the redirect chain.
pub async fn post_offer(
    bearer_token: &str,
    endpoint_url: &str,
    offer_sdp: &str,
) -> Result<OfferResponse, NetworkError> {
    let client = https_client();
    let user_agent = user_agent();

    let mut url = endpoint_url.to_string();
    let mut locations: Vec<String> = Vec::new();
    let mut redirects = 0usize;

    let (status, body) = loop {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(url.as_str())
            .header(CONTENT_TYPE, "application/sdp")
            .header(USER_AGENT, user_agent.as_str());
        if !bearer_token.is_empty() {
            builder = builder.header(AUTHORIZATION, format!("Bearer {bearer_token}"));
        }
        let request = builder
            .body(Full::new(Bytes::from(offer_sdp.to_string())))
            .map_err(|e| NetworkError::ConnectFailed(format!("failed to build request: {e}")))?;

        let response = tokio::time::timeout(REQUEST_TIMEOUT, client.request(request))
            .await
            .map_err(|_| NetworkError::ConnectFailed("request timed out".into()))?
            .map_err(|e| NetworkError::ConnectFailed(e.to_string()))?;

        if let Some(location) = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
        {
            locations.push(location.trim().to_string());
        }

        let status = response.status();
        if status.is_redirection() {
            if redirects >= MAX_REDIRECTS {
                return Err(NetworkError::ConnectFailed("too many redirects".into()));
            }
            // A redirect without a Location falls through to the status
            // check below, like a client that stops following.
            if let Some(target) = locations.last() {
                url = url::Url::parse(&url)
                    .and_then(|base| base.join(target))
                    .map(|u| u.to_string())
                    .map_err(|e| {
                        NetworkError::ConnectFailed(format!("bad redirect target: {e}"))
                    })?;
                redirects += 1;
                continue;
            }
        }

        let body = tokio::time::timeout(REQUEST_TIMEOUT, response.into_body().collect())
            .await
            .map_err(|_| NetworkError::ConnectFailed("response read timed out".into()))?
            .map_err(|e| NetworkError::ConnectFailed(e.to_string()))?
            .to_bytes();

        break (status, body);
    };

    if status != StatusCode::CREATED {
        return Err(NetworkError::InvalidHttpStatusCode(status.as_u16()));
    }

    if body.is_empty() {
        return Err(NetworkError::NoHttpData);
    }

    // Every redirect consumed one Location; the final 201 must carry its own.
    if locations.len() < redirects + 1 {
        return Err(NetworkError::NoLocationHeader);
    }

    let resource_url = build_resource_url(locations.last().unwrap(), &url)?;
    debug!("Resource URL is: {resource_url}");

    let body = String::from_utf8_lossy(&body);
    let answer_sdp = match body.find("v=0") {
        Some(idx) => body[idx..].to_string(),
        None => return Err(NetworkError::NoHttpData),
    };

    Ok(OfferResponse {
        answer_sdp,
        resource_url,
    })
}

/// Build the absolute resource URL from the last `Location:` header.
///
/// An absolute location is taken verbatim (normalized, default port
/// elided). A relative one replaces the path of the effective URL of the
/// final request and drops its query.
fn build_resource_url(location: &str, effective_url: &str) -> Result<String, NetworkError> {
    if location.starts_with("http") {
        let url = url::Url::parse(location).map_err(|_| NetworkError::InvalidLocationHeader)?;
        return Ok(url.to_string());
    }

    let mut url =
        url::Url::parse(effective_url).map_err(|_| NetworkError::FailedToBuildResourceUrl)?;
    if !url.has_host() {
        return Err(NetworkError::FailedToBuildResourceUrl);
    }
    url.set_path(location);
    url.set_query(None);
    Ok(url.to_string())
}

/// Best-effort teardown DELETE against the session resource URL.
pub async fn send_delete(bearer_token: &str, resource_url: &str) -> Result<(), NetworkError> {
    let client = https_client();

    let mut builder = Request::builder()
        .method(Method::DELETE)
        .uri(resource_url)
        .header(USER_AGENT, user_agent());
    if !bearer_token.is_empty() {
        builder = builder.header(AUTHORIZATION, format!("Bearer {bearer_token}"));
    }
    let request = builder
        .body(Full::new(Bytes::new()))
        .map_err(|e| NetworkError::DeleteFailed(format!("failed to build request: {e}")))?;

    let response = tokio::time::timeout(REQUEST_TIMEOUT, client.request(request))
        .await
        .map_err(|_| NetworkError::DeleteFailed("request timed out".into()))?
        .map_err(|e| NetworkError::DeleteFailed(e.to_string()))?;

    if response.status() != StatusCode::OK {
        return Err(NetworkError::InvalidHttpStatusCode(
            response.status().as_u16(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_location_replaces_path_and_strips_query() {
        let url = build_resource_url("/foo", "https://h/bar?q=1").unwrap();
        assert_eq!(url, "https://h/foo");
    }

    #[test]
    fn test_relative_location_without_leading_slash() {
        let url = build_resource_url("resource/42", "https://s.example/whep?token=x").unwrap();
        assert_eq!(url, "https://s.example/resource/42");
    }

    #[test]
    fn test_absolute_location_used_verbatim() {
        let url = build_resource_url("http://other.example/r/9", "https://h/bar").unwrap();
        assert_eq!(url, "http://other.example/r/9");
    }

    #[test]
    fn test_absolute_location_elides_default_port() {
        let url = build_resource_url("https://h:443/r/9", "https://h/bar").unwrap();
        assert_eq!(url, "https://h/r/9");
    }

    #[test]
    fn test_invalid_absolute_location() {
        assert!(matches!(
            build_resource_url("http://[broken", "https://h/bar"),
            Err(NetworkError::InvalidLocationHeader)
        ));
    }

    #[test]
    fn test_unusable_effective_url() {
        assert!(matches!(
            build_resource_url("/foo", "not a url"),
            Err(NetworkError::FailedToBuildResourceUrl)
        ));
    }

    #[test]
    fn test_user_agent_names_plugin_and_platform() {
        let ua = user_agent();
        assert!(ua.starts_with("Mozilla/5.0 (studio-webrtc/"));
        assert!(ua.contains(std::env::consts::OS));
    }
}
