//! WHIP/WHEP HTTP signaling (RFC 9725).
//!
//! A single POST carries the SDP offer and returns the answer plus a
//! `Location:` header naming the session resource; a DELETE on that
//! resource tears the session down.

mod client;

pub use client::{post_offer, send_delete, send_offer, user_agent, OfferResponse};
