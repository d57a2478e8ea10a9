//! WHIP output session: publish the host's encoded stream.
//!
//! Lifecycle: `start` validates the host is ready, then a worker thread
//! sets up the peer connection and performs the signaling exchange;
//! `encoded_packet` packetizes and sends on the encoder thread; `stop`
//! tears down and reports a stop signal. The start/stop mutex serializes
//! worker replacement so at most one worker thread exists per session.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::error::NetworkError;
use crate::host::{EncodedPacket, MediaKind, OutputHost, StopSignal};
use crate::peer::{PeerConnection, PeerState};
use crate::rtp::packetize::RtpTrackSender;
use crate::signaling;
use crate::RUNTIME;

pub struct WhipOutput {
    state: Arc<WhipState>,
}

struct WhipState {
    host: Arc<dyn OutputHost>,
    endpoint_url: Mutex<String>,
    bearer_token: Mutex<String>,
    resource_url: Mutex<String>,
    running: AtomicBool,
    start_stop: Mutex<Option<JoinHandle<()>>>,
    peer: Mutex<Option<Arc<PeerConnection>>>,
    audio_sender: Mutex<Option<RtpTrackSender>>,
    video_sender: Mutex<Option<RtpTrackSender>>,
    total_bytes_sent: AtomicU64,
    connect_time_ms: AtomicU32,
    start_instant: Mutex<Option<Instant>>,
    last_audio_dts_usec: AtomicI64,
    last_video_dts_usec: AtomicI64,
}

impl WhipOutput {
    pub fn new(host: Arc<dyn OutputHost>) -> Self {
        Self {
            state: Arc::new(WhipState {
                host,
                endpoint_url: Mutex::new(String::new()),
                bearer_token: Mutex::new(String::new()),
                resource_url: Mutex::new(String::new()),
                running: AtomicBool::new(false),
                start_stop: Mutex::new(None),
                peer: Mutex::new(None),
                audio_sender: Mutex::new(None),
                video_sender: Mutex::new(None),
                total_bytes_sent: AtomicU64::new(0),
                connect_time_ms: AtomicU32::new(0),
                start_instant: Mutex::new(None),
                last_audio_dts_usec: AtomicI64::new(0),
                last_video_dts_usec: AtomicI64::new(0),
            }),
        }
    }

    /// Begin a session. Returns false without spawning a worker when the
    /// host cannot start capture or its encoders fail to initialize.
    pub fn start(&self) -> bool {
        let mut guard = self.state.start_stop.lock();

        if !self.state.host.can_begin_data_capture() {
            return false;
        }
        if !self.state.host.initialize_encoders() {
            return false;
        }

        if let Some(handle) = guard.take() {
            let _ = handle.join();
        }

        let state = self.state.clone();
        match thread::Builder::new()
            .name("whip-start".to_string())
            .spawn(move || start_thread(state))
        {
            Ok(handle) => {
                *guard = Some(handle);
                true
            }
            Err(e) => {
                error!("Failed to spawn start thread: {e}");
                false
            }
        }
    }

    /// Stop the session and emit a Success signal once torn down.
    pub fn stop(&self) {
        stop(&self.state, true);
    }

    /// One encoded packet from the host. Runs on the encoder thread.
    pub fn encoded_packet(&self, packet: &EncodedPacket) {
        let state = &self.state;
        match packet.kind {
            MediaKind::Audio => {
                let duration =
                    packet.dts_usec - state.last_audio_dts_usec.load(Ordering::Relaxed);
                let sent = state
                    .audio_sender
                    .lock()
                    .as_mut()
                    .map(|sender| sender.send(&packet.data, duration))
                    .unwrap_or(0);
                state
                    .total_bytes_sent
                    .fetch_add(sent as u64, Ordering::Relaxed);
                state
                    .last_audio_dts_usec
                    .store(packet.dts_usec, Ordering::Relaxed);
            }
            MediaKind::Video => {
                let duration =
                    packet.dts_usec - state.last_video_dts_usec.load(Ordering::Relaxed);
                let sent = state
                    .video_sender
                    .lock()
                    .as_mut()
                    .map(|sender| sender.send(&packet.data, duration))
                    .unwrap_or(0);
                state
                    .total_bytes_sent
                    .fetch_add(sent as u64, Ordering::Relaxed);
                state
                    .last_video_dts_usec
                    .store(packet.dts_usec, Ordering::Relaxed);
            }
        }
    }

    /// The host encoder died: tear down without a Success signal and
    /// report the failure.
    pub fn encode_error(&self) {
        stop(&self.state, false);
        self.state.host.signal_stop(StopSignal::EncodeError);
    }

    pub fn total_bytes(&self) -> u64 {
        self.state.total_bytes_sent.load(Ordering::Relaxed)
    }

    pub fn connect_time_ms(&self) -> u32 {
        self.state.connect_time_ms.load(Ordering::Relaxed)
    }
}

impl Drop for WhipOutput {
    fn drop(&mut self) {
        self.stop();

        let mut guard = self.state.start_stop.lock();
        if let Some(handle) = guard.take() {
            let _ = handle.join();
        }
    }
}

/// Join any prior worker and hand teardown to a fresh stop worker.
///
/// `signal=false` is the internal reconnection path: the host UI must not
/// see a spurious stop, and the running flag survives for the next
/// attempt.
fn stop(state: &Arc<WhipState>, signal: bool) {
    let mut guard = state.start_stop.lock();
    if let Some(handle) = guard.take() {
        let _ = handle.join();
    }

    let state_for_thread = state.clone();
    match thread::Builder::new()
        .name("whip-stop".to_string())
        .spawn(move || stop_thread(state_for_thread, signal))
    {
        Ok(handle) => *guard = Some(handle),
        Err(e) => error!("Failed to spawn stop thread: {e}"),
    }
}

fn start_thread(state: Arc<WhipState>) {
    // Read connect info from the host service.
    let endpoint_url = state.host.endpoint_url();
    if endpoint_url.is_empty() {
        state.host.signal_stop(StopSignal::BadPath);
        return;
    }
    let bearer_token = state.host.bearer_token();
    *state.endpoint_url.lock() = endpoint_url.clone();
    *state.bearer_token.lock() = bearer_token.clone();

    // Set up the peer connection and both send tracks.
    let weak = Arc::downgrade(&state);
    let on_state: crate::peer::StateHandler = Box::new(move |peer_state| {
        if let Some(state) = weak.upgrade() {
            handle_state_change(state, peer_state);
        }
    });

    let setup = RUNTIME.block_on(PeerConnection::egress(on_state));
    let (peer, audio_sender, video_sender) = match setup {
        Ok(parts) => parts,
        Err(e) => {
            error!("Failed to set up peer connection: {e}");
            state.host.signal_stop(StopSignal::Error);
            return;
        }
    };
    let peer = Arc::new(peer);
    *state.peer.lock() = Some(peer.clone());
    *state.audio_sender.lock() = Some(audio_sender);
    *state.video_sender.lock() = Some(video_sender);

    match RUNTIME.block_on(signaling::send_offer(
        &bearer_token,
        &endpoint_url,
        &peer,
    )) {
        Ok(resource_url) => {
            debug!("WHIP Resource URL is: {resource_url}");
            *state.resource_url.lock() = resource_url;
            state.host.begin_data_capture();
            state.running.store(true, Ordering::SeqCst);
        }
        Err(e) => {
            signal_offer_failure(&state, &e);

            if let Some(peer) = state.peer.lock().take() {
                RUNTIME.block_on(peer.close());
            }
            *state.audio_sender.lock() = None;
            *state.video_sender.lock() = None;
        }
    }
}

fn stop_thread(state: Arc<WhipState>, signal: bool) {
    if let Some(peer) = state.peer.lock().take() {
        RUNTIME.block_on(peer.close());
    }
    *state.audio_sender.lock() = None;
    *state.video_sender.lock() = None;

    send_delete(&state);

    // "signal" preserves the running state across reconnect attempts: an
    // internal stop must not desync the host UI with a stop it never
    // asked for.
    if state.running.load(Ordering::SeqCst) && signal {
        state.host.signal_stop(StopSignal::Success);
        state.running.store(false, Ordering::SeqCst);
    }

    state.total_bytes_sent.store(0, Ordering::Relaxed);
    state.connect_time_ms.store(0, Ordering::Relaxed);
    *state.start_instant.lock() = None;
    state.last_audio_dts_usec.store(0, Ordering::Relaxed);
    state.last_video_dts_usec.store(0, Ordering::Relaxed);
}

fn send_delete(state: &WhipState) {
    let resource_url = state.resource_url.lock().clone();
    if resource_url.is_empty() {
        debug!("No resource URL available, not sending DELETE");
        return;
    }

    let bearer_token = state.bearer_token.lock().clone();
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

fn handle_state_change(state: Arc<WhipState>, peer_state: PeerState) {
    match peer_state {
        PeerState::Connecting => {
            *state.start_instant.lock() = Some(Instant::now());
        }
        PeerState::Connected => {
            let connect_time = state.start_instant.lock().map(|t0| t0.elapsed());
            if let Some(elapsed) = connect_time {
                let ms = elapsed.as_millis() as u32;
                state.connect_time_ms.store(ms, Ordering::Relaxed);
                info!("Connect time: {ms}ms");
            }
        }
        PeerState::Disconnected => {
            // Never block a library callback: teardown runs on a worker.
            let _ = RUNTIME.spawn_blocking(move || {
                stop(&state, false);
                state.host.signal_stop(StopSignal::Disconnected);
            });
        }
        PeerState::Failed => {
            let _ = RUNTIME.spawn_blocking(move || {
                stop(&state, false);
                state.host.signal_stop(StopSignal::Error);
            });
        }
        _ => {}
    }
}

fn signal_offer_failure(state: &WhipState, e: &NetworkError) {
    match e {
        NetworkError::ConnectFailed(cause) => {
            error!("Connect failed: {cause}");
            state.host.signal_stop(StopSignal::ConnectFailed);
        }
        NetworkError::InvalidHttpStatusCode(code) => {
            error!("Connect failed: HTTP endpoint returned non-201 response code {code}");
            state.host.signal_stop(StopSignal::InvalidStream);
        }
        NetworkError::NoHttpData => {
            error!("Connect failed: No data returned from HTTP endpoint request");
            state.host.signal_stop(StopSignal::ConnectFailed);
        }
        NetworkError::NoLocationHeader => {
            error!("WHIP server did not provide a resource URL via the Location header");
            state.host.signal_stop(StopSignal::ConnectFailed);
        }
        NetworkError::InvalidLocationHeader => {
            error!("WHIP server provided an invalid resource URL via the Location header");
            state.host.signal_stop(StopSignal::ConnectFailed);
        }
        NetworkError::FailedToBuildResourceUrl => {
            error!("Failed to build Resource URL");
            state.host.signal_stop(StopSignal::ConnectFailed);
        }
        NetworkError::DeleteFailed(cause) => {
            error!("Connect failed: {cause}");
            state.host.signal_stop(StopSignal::ConnectFailed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    #[derive(Default)]
    struct MockHost {
        endpoint: String,
        ready: bool,
        signals: PlMutex<Vec<StopSignal>>,
        captures: AtomicU32,
    }

    impl OutputHost for MockHost {
        fn endpoint_url(&self) -> String {
            self.endpoint.clone()
        }
        fn bearer_token(&self) -> String {
            String::new()
        }
        fn can_begin_data_capture(&self) -> bool {
            self.ready
        }
        fn initialize_encoders(&self) -> bool {
            self.ready
        }
        fn begin_data_capture(&self) {
            self.captures.fetch_add(1, Ordering::SeqCst);
        }
        fn signal_stop(&self, signal: StopSignal) {
            self.signals.lock().push(signal);
        }
    }

    fn join_worker(output: &WhipOutput) {
        let handle = output.state.start_stop.lock().take();
        if let Some(handle) = handle {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_start_refused_when_host_not_ready() {
        let host = Arc::new(MockHost {
            ready: false,
            ..Default::default()
        });
        let output = WhipOutput::new(host.clone());

        assert!(!output.start());
        assert!(output.state.start_stop.lock().is_none());
        assert!(host.signals.lock().is_empty());
    }

    #[test]
    fn test_empty_endpoint_signals_bad_path() {
        let host = Arc::new(MockHost {
            ready: true,
            ..Default::default()
        });
        let output = WhipOutput::new(host.clone());

        assert!(output.start());
        join_worker(&output);

        assert_eq!(host.signals.lock().as_slice(), &[StopSignal::BadPath]);
        assert_eq!(host.captures.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_double_stop_single_teardown() {
        let host = Arc::new(MockHost {
            ready: true,
            ..Default::default()
        });
        let output = WhipOutput::new(host.clone());

        output.stop();
        output.stop();
        join_worker(&output);

        // Never ran, so no Success signal, and nothing left behind.
        assert!(host.signals.lock().is_empty());
        assert!(output.state.resource_url.lock().is_empty());
        assert_eq!(output.total_bytes(), 0);
    }

    #[test]
    fn test_encoded_packet_before_start_is_noop() {
        let host = Arc::new(MockHost::default());
        let output = WhipOutput::new(host);

        output.encoded_packet(&EncodedPacket {
            kind: MediaKind::Audio,
            data: bytes::Bytes::from_static(&[0u8; 10]),
            dts_usec: 0,
        });
        assert_eq!(output.total_bytes(), 0);
    }

    #[test]
    fn test_encode_error_reports_and_keeps_session_quiet() {
        let host = Arc::new(MockHost {
            ready: true,
            ..Default::default()
        });
        let output = WhipOutput::new(host.clone());

        output.encode_error();
        join_worker(&output);

        assert_eq!(host.signals.lock().as_slice(), &[StopSignal::EncodeError]);
    }
}
