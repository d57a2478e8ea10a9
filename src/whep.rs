//! WHEP source session: pull a remote stream and hand decoded frames to
//! the host.
//!
//! Lifecycle: `update` applies the configured endpoint and bearer token
//! and (re)connects when they change; `video_tick` drives keyframe
//! recovery; `stop`/drop tears the session down. One worker thread at a
//! time runs signaling and teardown, serialized by the start/stop mutex.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::error::NetworkError;
use crate::host::{FrameSink, Settings};
use crate::peer::{PeerConnection, PeerState};
use crate::pli::PliState;
use crate::signaling;
use crate::RUNTIME;

pub struct WhepSource {
    state: Arc<WhepState>,
}

struct WhepState {
    sink: Arc<dyn FrameSink>,
    /// Settings most recently handed to `update`
    settings: Mutex<Settings>,
    /// Settings of the session currently being started or running; used to
    /// make `update` idempotent.
    applied: Mutex<Option<Settings>>,
    resource_url: Mutex<String>,
    peer: Mutex<Option<Arc<PeerConnection>>>,
    pli: Arc<PliState>,
    running: AtomicBool,
    start_stop: Mutex<Option<JoinHandle<()>>>,
}

impl WhepSource {
    pub fn new(sink: Arc<dyn FrameSink>, settings: &Settings) -> Self {
        let source = Self {
            state: Arc::new(WhepState {
                sink,
                settings: Mutex::new(Settings::default()),
                applied: Mutex::new(None),
                resource_url: Mutex::new(String::new()),
                peer: Mutex::new(None),
                pli: Arc::new(PliState::new()),
                running: AtomicBool::new(false),
                start_stop: Mutex::new(None),
            }),
        };
        source.update(settings);
        source
    }

    /// Apply new settings. Empty endpoint or token means no work;
    /// unchanged values mean no reconnection; otherwise any prior worker
    /// is joined and a fresh connection attempt starts.
    pub fn update(&self, settings: &Settings) {
        *self.state.settings.lock() = settings.clone();

        if settings.endpoint_url.is_empty() || settings.bearer_token.is_empty() {
            return;
        }
        if self.state.applied.lock().as_ref() == Some(settings) {
            return;
        }

        let mut guard = self.state.start_stop.lock();
        if let Some(handle) = guard.take() {
            let _ = handle.join();
        }

        *self.state.applied.lock() = Some(settings.clone());
        let state = self.state.clone();
        match thread::Builder::new()
            .name("whep-start".to_string())
            .spawn(move || start_thread(state))
        {
            Ok(handle) => *guard = Some(handle),
            Err(e) => error!("Failed to spawn start thread: {e}"),
        }
    }

    /// Host video tick: request a keyframe if frames stopped arriving.
    pub fn video_tick(&self) {
        if !self.state.pli.should_request_keyframe() {
            return;
        }

        let peer = self.state.peer.lock().clone();
        if let Some(peer) = peer {
            RUNTIME.block_on(peer.request_keyframe());
        }
    }

    /// Tear the session down: close the peer connection, then issue the
    /// best-effort DELETE. Safe to call repeatedly.
    pub fn stop(&self) {
        let mut guard = self.state.start_stop.lock();
        if let Some(handle) = guard.take() {
            let _ = handle.join();
        }

        let state = self.state.clone();
        match thread::Builder::new()
            .name("whep-stop".to_string())
            .spawn(move || stop_thread(state))
        {
            Ok(handle) => *guard = Some(handle),
            Err(e) => error!("Failed to spawn stop thread: {e}"),
        }
    }
}

impl Drop for WhepSource {
    fn drop(&mut self) {
        self.stop();

        let mut guard = self.state.start_stop.lock();
        if let Some(handle) = guard.take() {
            let _ = handle.join();
        }
    }
}

fn start_thread(state: Arc<WhepState>) {
    // Reconnect-safe: quietly drop any previous session first.
    teardown(&state);

    let settings = state.settings.lock().clone();

    let weak = Arc::downgrade(&state);
    let on_state: crate::peer::StateHandler = Box::new(move |peer_state| {
        if let (Some(state), PeerState::Disconnected | PeerState::Failed) =
            (weak.upgrade(), peer_state)
        {
            // Never block a library callback: hand teardown to a worker.
            let _ = RUNTIME.spawn_blocking(move || {
                teardown(&state);
                state.running.store(false, Ordering::SeqCst);
            });
        }
    });

    let result = RUNTIME.block_on(async {
        let peer = Arc::new(
            PeerConnection::ingest(state.sink.clone(), state.pli.clone(), on_state)
                .await
                .map_err(|e| NetworkError::ConnectFailed(e.to_string()))?,
        );
        *state.peer.lock() = Some(peer.clone());

        signaling::send_offer(&settings.bearer_token, &settings.endpoint_url, &peer).await
    });

    match result {
        Ok(resource_url) => {
            debug!("WHEP Resource URL is: {resource_url}");
            *state.resource_url.lock() = resource_url;
            state.running.store(true, Ordering::SeqCst);
        }
        Err(e) => {
            log_offer_failure(&e);
            if let Some(peer) = state.peer.lock().take() {
                RUNTIME.block_on(peer.close());
            }
        }
    }
}

fn stop_thread(state: Arc<WhepState>) {
    teardown(&state);
    state.running.store(false, Ordering::SeqCst);
    *state.applied.lock() = None;
}

/// Close the peer connection (stopping all callbacks), then DELETE the
/// session resource. Clears the resource URL on success so repeated
/// teardowns are no-ops.
fn teardown(state: &WhepState) {
    if let Some(peer) = state.peer.lock().take() {
        RUNTIME.block_on(peer.close());
    }

    let resource_url = state.resource_url.lock().clone();
    if resource_url.is_empty() {
        debug!("No resource URL available, not sending DELETE");
        return;
    }

    let bearer_token = state.settings.lock().bearer_token.clone();
    match RUNTIME.block_on(signaling::send_delete(&bearer_token, &resource_url)) {
        Ok(()) => {
            debug!("Successfully performed DELETE request for resource URL");
            state.resource_url.lock().clear();
        }
        Err(NetworkError::InvalidHttpStatusCode(_)) => {
            warn!("DELETE request for resource URL returned non-200 Status Code");
        }
        Err(_) => warn!("DELETE request for resource URL failed"),
    }
}

fn log_offer_failure(e: &NetworkError) {
    match e {
        NetworkError::ConnectFailed(cause) => error!("Connect failed: {cause}"),
        NetworkError::InvalidHttpStatusCode(code) => {
            error!("Connect failed: HTTP endpoint returned non-201 response code {code}")
        }
        NetworkError::NoHttpData => {
            error!("Connect failed: No data returned from HTTP endpoint request")
        }
        NetworkError::NoLocationHeader => {
            error!("WHEP server did not provide a resource URL via the Location header")
        }
        NetworkError::InvalidLocationHeader => {
            error!("WHEP server provided an invalid resource URL via the Location header")
        }
        NetworkError::FailedToBuildResourceUrl => error!("Failed to build Resource URL"),
        NetworkError::DeleteFailed(cause) => warn!("DELETE request failed: {cause}"),
    }
}
