//! Error types shared across the plugin.

use thiserror::Error;

/// Errors produced by the WHIP/WHEP signaling exchange.
///
/// Each variant maps onto exactly one host stop signal, see the session
/// orchestrators in `whip`/`whep`.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The HTTP transport failed outright (DNS, TCP, TLS, timeout).
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    /// The endpoint answered with something other than the expected status.
    #[error("HTTP endpoint returned unexpected response code {0}")]
    InvalidHttpStatusCode(u16),
    /// The endpoint returned an empty (or SDP-less) response body.
    #[error("no data returned from HTTP endpoint request")]
    NoHttpData,
    /// No `Location:` header was seen for the final response in the chain.
    #[error("no resource URL provided via the Location header")]
    NoLocationHeader,
    /// The `Location:` header could not be turned into a usable URL.
    #[error("invalid resource URL provided via the Location header")]
    InvalidLocationHeader,
    /// The effective request URL could not serve as a base for a relative
    /// `Location:` value.
    #[error("failed to build resource URL")]
    FailedToBuildResourceUrl,
    /// The teardown DELETE could not be delivered.
    #[error("DELETE request failed: {0}")]
    DeleteFailed(String),
}

/// Errors raised while taking apart incoming RTP payloads.
///
/// These never escape the media path: the offending packet is logged and
/// dropped, the session keeps running.
#[derive(Debug, Error)]
pub enum RtpError {
    #[error("malformed RTP payload: {0}")]
    MalformedRtp(&'static str),
}

/// Decoder construction and decode failures.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to create decoder: {0}")]
    CreateFailed(String),
    #[error("decode error: {0}")]
    Decode(String),
}
