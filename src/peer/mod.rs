//! Peer-connection façade over webrtc-rs.

mod connection;

pub use connection::{PeerConnection, PeerError, PeerState, StateHandler};
