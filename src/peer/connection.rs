//! Single WebRTC peer connection.
//!
//! Wraps RTCPeerConnection from webrtc-rs: codec registration (exactly
//! OPUS at payload type 111 and H.264 at payload type 96), transceiver
//! setup for either direction, state-change dispatch, keyframe requests,
//! and the per-track read loops that feed the receive pipeline.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use thiserror::Error;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264, MIME_TYPE_OPUS};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCPFeedback, RTCRtpTransceiverInit};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::decode::{AudioPipeline, VideoPipeline};
use crate::host::FrameSink;
use crate::pli::PliState;
use crate::rtp::depacketize::H264Depacketizer;
use crate::rtp::packetize::RtpTrackSender;
use crate::rtp::reorder::ReorderQueue;
use crate::rtp::{H264_CLOCK_RATE, H264_PAYLOAD_TYPE, OPUS_CLOCK_RATE, OPUS_PAYLOAD_TYPE};

/// Length of the generated media-stream id.
const SIGNALING_MEDIA_ID_LENGTH: usize = 16;

/// How long to wait for ICE gathering before sending the offer anyway.
const ICE_GATHERING_TIMEOUT: Duration = Duration::from_secs(5);

/// Peer connection lifecycle, mirrored from the underlying library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PeerState::New => "New",
            PeerState::Connecting => "Connecting",
            PeerState::Connected => "Connected",
            PeerState::Disconnected => "Disconnected",
            PeerState::Failed => "Failed",
            PeerState::Closed => "Closed",
        };
        f.write_str(name)
    }
}

impl From<RTCPeerConnectionState> for PeerState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => PeerState::Connecting,
            RTCPeerConnectionState::Connected => PeerState::Connected,
            RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
            RTCPeerConnectionState::Failed => PeerState::Failed,
            RTCPeerConnectionState::Closed => PeerState::Closed,
            _ => PeerState::New,
        }
    }
}

/// Callback invoked on every peer connection state transition.
pub type StateHandler = Box<dyn Fn(PeerState) + Send + Sync>;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("{0}")]
    WebRtc(#[from] webrtc::Error),
    #[error("no local description available")]
    NoLocalDescription,
}

/// Adapter over one RTCPeerConnection, either receive-only (WHEP) or
/// send-only (WHIP).
pub struct PeerConnection {
    pc: Arc<RTCPeerConnection>,
    /// SSRC of the received video track, for keyframe requests. Zero until
    /// the track arrives.
    video_ssrc: Arc<AtomicU32>,
}

fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_owned(),
        clock_rate: OPUS_CLOCK_RATE,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
        rtcp_feedback: vec![],
    }
}

fn h264_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_H264.to_owned(),
        clock_rate: H264_CLOCK_RATE,
        channels: 0,
        sdp_fmtp_line: "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
            .to_owned(),
        rtcp_feedback: vec![
            RTCPFeedback {
                typ: "nack".to_owned(),
                parameter: "".to_owned(),
            },
            RTCPFeedback {
                typ: "nack".to_owned(),
                parameter: "pli".to_owned(),
            },
        ],
    }
}

/// Build an API advertising only the two codecs of this profile, with the
/// default interceptor chain (sender/receiver reports, NACK).
fn build_api() -> Result<API, webrtc::Error> {
    let mut media_engine = MediaEngine::default();

    media_engine.register_codec(
        RTCRtpCodecParameters {
            capability: opus_capability(),
            payload_type: OPUS_PAYLOAD_TYPE,
            ..Default::default()
        },
        RTPCodecType::Audio,
    )?;
    media_engine.register_codec(
        RTCRtpCodecParameters {
            capability: h264_capability(),
            payload_type: H264_PAYLOAD_TYPE,
            ..Default::default()
        },
        RTPCodecType::Video,
    )?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

impl PeerConnection {
    /// Receive-only peer connection for a WHEP session.
    ///
    /// Media id "0" carries OPUS, media id "1" carries H.264. Incoming
    /// tracks are read on the shared runtime and fed through the reorder,
    /// depacketize and decode stages into `sink`.
    pub async fn ingest(
        sink: Arc<dyn FrameSink>,
        pli: Arc<PliState>,
        on_state: StateHandler,
    ) -> Result<Self, PeerError> {
        let api = build_api()?;
        let pc = Arc::new(api.new_peer_connection(RTCConfiguration::default()).await?);

        install_state_handler(&pc, on_state);

        // Audio first so the mids come out as "0" (audio) and "1" (video).
        pc.add_transceiver_from_kind(
            RTPCodecType::Audio,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            }),
        )
        .await?;
        pc.add_transceiver_from_kind(
            RTPCodecType::Video,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            }),
        )
        .await?;

        let video_ssrc = Arc::new(AtomicU32::new(0));

        let sink_for_track = sink;
        let pli_for_track = pli;
        let ssrc_for_track = video_ssrc.clone();
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let mime_type = track.codec().capability.mime_type.to_lowercase();

            if mime_type.contains("opus") {
                let sink = sink_for_track.clone();
                return Box::pin(async move {
                    read_audio_track(track, sink).await;
                });
            }

            if mime_type.contains("h264") {
                ssrc_for_track.store(track.ssrc(), Ordering::SeqCst);
                let sink = sink_for_track.clone();
                let pli = pli_for_track.clone();
                return Box::pin(async move {
                    read_video_track(track, sink, pli).await;
                });
            }

            warn!("Ignoring unknown track type: {mime_type}");
            Box::pin(async {})
        }));

        Ok(Self { pc, video_ssrc })
    }

    /// Send-only peer connection for a WHIP session.
    ///
    /// Both tracks share one random media-stream id; the audio SSRC is
    /// random in `[1, 2^32 - 2]` and the video SSRC is one above it, which
    /// keeps the pair predictable for debugging.
    pub async fn egress(
        on_state: StateHandler,
    ) -> Result<(Self, RtpTrackSender, RtpTrackSender), PeerError> {
        let api = build_api()?;
        let pc = Arc::new(api.new_peer_connection(RTCConfiguration::default()).await?);

        install_state_handler(&pc, on_state);

        let media_stream_id: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SIGNALING_MEDIA_ID_LENGTH)
            .map(char::from)
            .collect();

        let audio_track = Arc::new(TrackLocalStaticRTP::new(
            opus_capability(),
            "audio".to_owned(),
            media_stream_id.clone(),
        ));
        let video_track = Arc::new(TrackLocalStaticRTP::new(
            h264_capability(),
            "video".to_owned(),
            media_stream_id,
        ));

        for track in [
            audio_track.clone() as Arc<dyn TrackLocal + Send + Sync>,
            video_track.clone() as Arc<dyn TrackLocal + Send + Sync>,
        ] {
            let transceiver = pc
                .add_transceiver_from_track(
                    track,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Sendonly,
                        send_encodings: vec![],
                    }),
                )
                .await?;

            // Drain incoming RTCP so the interceptors process receiver
            // reports and NACKs.
            let rtp_sender = transceiver.sender().await;
            tokio::spawn(async move {
                let mut rtcp_buf = vec![0u8; 1500];
                while let Ok((_, _)) = rtp_sender.read(&mut rtcp_buf).await {}
            });
        }

        let audio_ssrc: u32 = thread_rng().gen_range(1..=u32::MAX - 1);
        let video_ssrc = audio_ssrc.wrapping_add(1);

        let audio_sender = RtpTrackSender::opus(audio_track, audio_ssrc);
        let video_sender = RtpTrackSender::h264(video_track, video_ssrc);

        Ok((
            Self {
                pc,
                video_ssrc: Arc::new(AtomicU32::new(0)),
            },
            audio_sender,
            video_sender,
        ))
    }

    /// Create the local offer, wait for ICE gathering (bounded), and
    /// return the SDP to post. Trickle ICE is not used: candidates ride
    /// in the offer.
    pub async fn offer(&self) -> Result<String, PeerError> {
        let ice_complete = Arc::new(tokio::sync::Notify::new());
        let ice_complete_clone = ice_complete.clone();
        self.pc
            .on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
                if state == RTCIceGathererState::Complete {
                    ice_complete_clone.notify_one();
                }
                Box::pin(async {})
            }));

        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer).await?;

        tokio::select! {
            _ = ice_complete.notified() => {}
            _ = tokio::time::sleep(ICE_GATHERING_TIMEOUT) => {}
        }

        let local = self
            .pc
            .local_description()
            .await
            .ok_or(PeerError::NoLocalDescription)?;
        Ok(local.sdp)
    }

    /// Apply the remote SDP answer.
    pub async fn apply_answer(&self, answer_sdp: String) -> Result<(), PeerError> {
        let answer = RTCSessionDescription::answer(answer_sdp)?;
        self.pc.set_remote_description(answer).await?;
        Ok(())
    }

    /// Ask the sender for a keyframe via RTCP PLI. No-op until the video
    /// track has arrived.
    pub async fn request_keyframe(&self) {
        let media_ssrc = self.video_ssrc.load(Ordering::SeqCst);
        if media_ssrc == 0 {
            return;
        }

        if let Err(e) = self
            .pc
            .write_rtcp(&[Box::new(PictureLossIndication {
                sender_ssrc: 0,
                media_ssrc,
            })])
            .await
        {
            warn!("Failed to send PLI: {e}");
        }
    }

    /// Close the peer connection; callbacks stop firing once this returns.
    pub async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!("Failed to close peer connection: {e}");
        }
    }
}

fn install_state_handler(pc: &Arc<RTCPeerConnection>, on_state: StateHandler) {
    pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        let state = PeerState::from(s);
        info!("PeerConnection state is now: {state}");
        on_state(state);
        Box::pin(async {})
    }));
}

/// Read loop for the OPUS track: every packet is one sample, no
/// reordering needed in this profile.
async fn read_audio_track(track: Arc<TrackRemote>, sink: Arc<dyn FrameSink>) {
    let mut pipeline = match AudioPipeline::new(sink) {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to create OPUS decoder: {e}");
            return;
        }
    };

    loop {
        match track.read_rtp().await {
            Ok((packet, _attributes)) => {
                if packet.payload.is_empty() {
                    continue;
                }
                pipeline.decode(&packet.payload, packet.header.timestamp);
            }
            Err(e) => {
                if is_track_shutdown(&e) {
                    break;
                }
                warn!("Audio RTP read error: {e}");
            }
        }
    }
}

/// Read loop for the H.264 track: reorder by sequence number, release
/// timestamp-complete frames, depacketize and decode.
async fn read_video_track(track: Arc<TrackRemote>, sink: Arc<dyn FrameSink>, pli: Arc<PliState>) {
    let mut pipeline = match VideoPipeline::new(sink, pli) {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to create H264 decoder: {e}");
            return;
        }
    };
    let mut queue = ReorderQueue::new();
    let mut depacketizer = H264Depacketizer::new();

    loop {
        match track.read_rtp().await {
            Ok((packet, _attributes)) => {
                queue.push(packet);

                while let Some(frame) = queue.pop_frame() {
                    for packet in &frame {
                        match depacketizer.depacketize(&packet.payload) {
                            Ok(Some(nalu)) => {
                                pipeline.decode(&nalu, packet.header.timestamp);
                            }
                            Ok(None) => {}
                            Err(e) => warn!("Dropping malformed RTP packet: {e}"),
                        }
                    }
                }
            }
            Err(e) => {
                if is_track_shutdown(&e) {
                    break;
                }
                warn!("Video RTP read error: {e}");
            }
        }
    }
}

/// Expected read errors when the peer connection is torn down.
fn is_track_shutdown(e: &webrtc::Error) -> bool {
    let msg = e.to_string().to_lowercase();
    msg.contains("eof") || msg.contains("closed") || msg.contains("nil")
}
