//! Send-side RTP packetization with timestamp bookkeeping.
//!
//! One `RtpTrackSender` per outgoing track. The payloader splits each
//! encoded sample into RTP payloads (FU-A/STAP-A for H.264, one packet
//! per sample for OPUS); the sender advances the track's RTP timestamp by
//! the sample duration and keeps the sender-report cadence state. Actual
//! RTCP sender reports and NACK retransmissions are produced by the
//! interceptor chain attached to the peer connection.

use std::sync::Arc;

use bytes::Bytes;
use log::{debug, error};
use webrtc::rtp::codecs::h264::H264Payloader;
use webrtc::rtp::codecs::opus::OpusPayloader;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;
use webrtc::rtp::packetizer::Payloader;
use webrtc::rtp::sequence::{new_random_sequencer, Sequencer};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;
use webrtc::Error;

use super::{
    RtpTrackConfig, H264_CLOCK_RATE, H264_PAYLOAD_TYPE, MAX_VIDEO_FRAGMENT_SIZE, OPUS_CLOCK_RATE,
    OPUS_PAYLOAD_TYPE,
};
use crate::RUNTIME;

/// Packetizer, sequencer and timestamp state for one send track.
pub struct RtpTrackSender {
    track: Arc<TrackLocalStaticRTP>,
    payloader: Box<dyn Payloader + Send + Sync>,
    sequencer: Box<dyn Sequencer + Send + Sync>,
    config: RtpTrackConfig,
    max_fragment_size: usize,
    timestamp: u32,
    last_reported_timestamp: u32,
}

impl RtpTrackSender {
    /// OPUS sender at the default 48 kHz clock.
    pub fn opus(track: Arc<TrackLocalStaticRTP>, ssrc: u32) -> Self {
        Self::new(
            track,
            Box::<OpusPayloader>::default(),
            RtpTrackConfig {
                ssrc,
                payload_type: OPUS_PAYLOAD_TYPE,
                clock_rate: OPUS_CLOCK_RATE,
            },
        )
    }

    /// H.264 sender using start-sequence packetization at the 90 kHz clock.
    pub fn h264(track: Arc<TrackLocalStaticRTP>, ssrc: u32) -> Self {
        Self::new(
            track,
            Box::<H264Payloader>::default(),
            RtpTrackConfig {
                ssrc,
                payload_type: H264_PAYLOAD_TYPE,
                clock_rate: H264_CLOCK_RATE,
            },
        )
    }

    fn new(
        track: Arc<TrackLocalStaticRTP>,
        payloader: Box<dyn Payloader + Send + Sync>,
        config: RtpTrackConfig,
    ) -> Self {
        Self {
            track,
            payloader,
            sequencer: Box::new(new_random_sequencer()),
            config,
            max_fragment_size: MAX_VIDEO_FRAGMENT_SIZE,
            timestamp: 0,
            last_reported_timestamp: 0,
        }
    }

    /// Packetize and send one encoded sample.
    ///
    /// `duration_usec` is the time covered by the sample (the DTS delta to
    /// the previous one); it advances the RTP timestamp before the sample
    /// is put on the wire. Returns the number of sample bytes delivered,
    /// zero when the track is not (or no longer) writable.
    pub fn send(&mut self, data: &Bytes, duration_usec: i64) -> usize {
        let elapsed_seconds = duration_usec as f64 / (1000.0 * 1000.0);
        let elapsed_timestamp = self.config.seconds_to_timestamp(elapsed_seconds);
        self.timestamp = self.timestamp.wrapping_add(elapsed_timestamp);

        let report_elapsed = self.timestamp.wrapping_sub(self.last_reported_timestamp);
        if self.config.timestamp_to_seconds(report_elapsed) > 1.0 {
            // The report interceptor emits the actual sender report.
            debug!("sender report due for ssrc {}", self.config.ssrc);
            self.last_reported_timestamp = self.timestamp;
        }

        let payloads = match self.payloader.payload(self.max_fragment_size, data) {
            Ok(payloads) => payloads,
            Err(e) => {
                error!("failed to packetize sample: {e}");
                return 0;
            }
        };

        let count = payloads.len();
        for (i, payload) in payloads.into_iter().enumerate() {
            let packet = Packet {
                header: Header {
                    version: 2,
                    marker: i == count - 1,
                    payload_type: self.config.payload_type,
                    sequence_number: self.sequencer.next_sequence_number(),
                    timestamp: self.timestamp,
                    ssrc: self.config.ssrc,
                    ..Default::default()
                },
                payload,
            };

            match RUNTIME.block_on(self.track.write_rtp(&packet)) {
                Ok(_) => {}
                // The track went away mid-send; swallow it like any other
                // write to a closed track.
                Err(Error::ErrClosedPipe) => return 0,
                Err(e) => {
                    error!("error: {e}");
                    return 0;
                }
            }
        }

        data.len()
    }

    /// Current RTP timestamp, after all sent samples.
    pub fn rtp_timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn config(&self) -> &RtpTrackConfig {
        &self.config
    }
}
