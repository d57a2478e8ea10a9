//! studio-webrtc: WebRTC WHIP/WHEP streaming plugin for the studio host.
//!
//! Ingests a remote stream over WHEP (H.264 video + OPUS audio, decoded to
//! raw frames for the host) and publishes the host's encoded output over
//! WHIP. Signaling is the plain HTTP offer/answer exchange of RFC 9725:
//! one POST carrying the SDP offer, a `Location:` header naming the
//! per-session resource, and a DELETE to tear it down.
//!
//! ## Features
//!
//! - **WHEP source**: recv-only peer connection, RTP reorder + H.264/OPUS
//!   depacketization, stateful decoders, keyframe recovery via PLI
//! - **WHIP output**: send-only peer connection, H.264/OPUS packetization
//!   with sender-report cadence and NACK handling via the interceptor chain
//! - **Bearer-token auth**: optional `Authorization: Bearer` on all requests

use lazy_static::lazy_static;
use tokio::runtime::Runtime;

pub mod codec;
pub mod decode;
pub mod error;
pub mod host;
pub mod peer;
pub mod pli;
pub mod rtp;
pub mod signaling;
pub mod whep;
pub mod whip;

pub use error::NetworkError;
pub use host::{properties, Settings};
pub use whep::WhepSource;
pub use whip::WhipOutput;

lazy_static! {
    /// Shared tokio runtime for async operations.
    ///
    /// Session workers are plain threads; everything that touches webrtc-rs
    /// or the HTTP client is driven through this runtime via `block_on`.
    pub(crate) static ref RUNTIME: Runtime =
        Runtime::new().expect("Failed to create tokio runtime");
}
