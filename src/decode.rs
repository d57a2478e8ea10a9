//! Decode pipelines: depacketized units in, host frames out.
//!
//! One pipeline per received track. Decode refusals are logged and the
//! offending unit dropped; the decoders are never torn down mid-session.

use std::sync::Arc;

use log::warn;
use opus::Channels;

use crate::codec::h264::video_frame_from_yuv;
use crate::codec::{H264Decoder, OpusDecoder};
use crate::error::CodecError;
use crate::host::{speaker_layout_from_channels, AudioFrame, FrameSink, SampleFormat};
use crate::pli::PliState;
use crate::rtp::{H264_CLOCK_RATE, OPUS_CLOCK_RATE};

/// Receive-side presentation timestamp state.
///
/// The first frame is pinned to PTS 0 whatever its RTP timestamp; every
/// later frame advances by the RTP delta converted to nanoseconds.
/// Downstream clocks must not assume the RTP epoch.
#[derive(Default)]
pub struct ReceiverTimestamps {
    started: bool,
    last_rtp_timestamp: u32,
    last_pts_ns: u64,
}

impl ReceiverTimestamps {
    pub fn next_pts_ns(&mut self, rtp_timestamp: u32, clock_rate: u32) -> u64 {
        if !self.started {
            self.started = true;
            self.last_rtp_timestamp = rtp_timestamp;
            self.last_pts_ns = 0;
            return 0;
        }

        let diff = u64::from(rtp_timestamp.wrapping_sub(self.last_rtp_timestamp));
        self.last_rtp_timestamp = rtp_timestamp;
        self.last_pts_ns += diff * 1_000_000_000 / u64::from(clock_rate);
        self.last_pts_ns
    }
}

/// H.264 NAL units to I420 host frames.
pub struct VideoPipeline {
    decoder: H264Decoder,
    timestamps: ReceiverTimestamps,
    sink: Arc<dyn FrameSink>,
    pli: Arc<PliState>,
}

impl VideoPipeline {
    pub fn new(sink: Arc<dyn FrameSink>, pli: Arc<PliState>) -> Result<Self, CodecError> {
        Ok(Self {
            decoder: H264Decoder::new()?,
            timestamps: ReceiverTimestamps::default(),
            sink,
            pli,
        })
    }

    /// Decode one Annex B unit and deliver any ready frame to the host.
    pub fn decode(&mut self, nalu: &[u8], rtp_timestamp: u32) {
        match self.decoder.decode(nalu) {
            Ok(Some(yuv)) => {
                let pts = self.timestamps.next_pts_ns(rtp_timestamp, H264_CLOCK_RATE);
                let frame = video_frame_from_yuv(&yuv, pts);
                self.sink.output_video(&frame);
                self.pli.mark_frame();
            }
            Ok(None) => {} // needs more input
            Err(e) => warn!("dropping undecodable video unit: {e}"),
        }
    }
}

/// OPUS payloads to interleaved float host frames.
pub struct AudioPipeline {
    decoder: OpusDecoder,
    sink: Arc<dyn FrameSink>,
}

impl AudioPipeline {
    pub fn new(sink: Arc<dyn FrameSink>) -> Result<Self, CodecError> {
        Ok(Self {
            decoder: OpusDecoder::new(OPUS_CLOCK_RATE, Channels::Stereo)?,
            sink,
        })
    }

    /// Decode one packet payload and deliver it to the host. The RTP
    /// timestamp passes through as the frame timestamp.
    pub fn decode(&mut self, payload: &[u8], rtp_timestamp: u32) {
        let sample_rate = self.decoder.sample_rate();
        let channels = self.decoder.channels();

        match self.decoder.decode(payload) {
            Ok((samples, samples_per_channel)) => {
                let frame = AudioFrame {
                    sample_rate,
                    format: SampleFormat::Flt,
                    layout: speaker_layout_from_channels(channels),
                    data: samples,
                    samples_per_channel,
                    timestamp: u64::from(rtp_timestamp),
                };
                self.sink.output_audio(&frame);
            }
            Err(e) => warn!("dropping undecodable audio packet: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_frame_pts_is_zero() {
        let mut ts = ReceiverTimestamps::default();
        assert_eq!(ts.next_pts_ns(900_000, H264_CLOCK_RATE), 0);
    }

    #[test]
    fn test_pts_advances_by_rtp_delta() {
        let mut ts = ReceiverTimestamps::default();
        ts.next_pts_ns(900_000, H264_CLOCK_RATE);
        // 3000 ticks at 90kHz = 33.33ms
        assert_eq!(ts.next_pts_ns(903_000, H264_CLOCK_RATE), 33_333_333);
        assert_eq!(ts.next_pts_ns(906_000, H264_CLOCK_RATE), 66_666_666);
    }

    #[test]
    fn test_pts_survives_rtp_wraparound() {
        let mut ts = ReceiverTimestamps::default();
        ts.next_pts_ns(u32::MAX - 1499, H264_CLOCK_RATE);
        let pts = ts.next_pts_ns(1500, H264_CLOCK_RATE);
        // 3000 ticks across the wrap
        assert_eq!(pts, 33_333_333);
    }

    #[test]
    fn test_pts_is_monotonic() {
        let mut ts = ReceiverTimestamps::default();
        let mut last = ts.next_pts_ns(100, H264_CLOCK_RATE);
        for rtp in [3100u32, 6100, 6100, 9100] {
            let pts = ts.next_pts_ns(rtp, H264_CLOCK_RATE);
            assert!(pts >= last);
            last = pts;
        }
    }
}
