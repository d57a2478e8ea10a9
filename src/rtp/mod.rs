//! RTP media plumbing: reorder + reassembly on the receive side,
//! packetization and timestamp bookkeeping on the send side.

pub mod depacketize;
pub mod packetize;
pub mod reorder;

/// OPUS static payload parameters negotiated on media id "0".
pub const OPUS_PAYLOAD_TYPE: u8 = 111;
pub const OPUS_CLOCK_RATE: u32 = 48000;

/// H.264 payload parameters negotiated on media id "1".
pub const H264_PAYLOAD_TYPE: u8 = 96;
pub const H264_CLOCK_RATE: u32 = 90000;

/// Maximum size of one H.264 RTP fragment. Effective range is 576-1470;
/// lower values mean more packets but better network compatibility.
pub const MAX_VIDEO_FRAGMENT_SIZE: usize = 1200;

/// Static RTP parameters of one send track.
#[derive(Debug, Clone, Copy)]
pub struct RtpTrackConfig {
    pub ssrc: u32,
    pub payload_type: u8,
    pub clock_rate: u32,
}

impl RtpTrackConfig {
    /// Convert a duration in seconds to ticks of this track's clock.
    pub fn seconds_to_timestamp(&self, seconds: f64) -> u32 {
        (seconds * f64::from(self.clock_rate)) as u32
    }

    /// Convert ticks of this track's clock to seconds.
    pub fn timestamp_to_seconds(&self, timestamp: u32) -> f64 {
        f64::from(timestamp) / f64::from(self.clock_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_to_timestamp_at_audio_clock() {
        let config = RtpTrackConfig {
            ssrc: 1,
            payload_type: OPUS_PAYLOAD_TYPE,
            clock_rate: OPUS_CLOCK_RATE,
        };
        assert_eq!(config.seconds_to_timestamp(0.02), 960);
        assert_eq!(config.seconds_to_timestamp(0.0), 0);
    }

    #[test]
    fn test_timestamp_seconds_round_trip() {
        let config = RtpTrackConfig {
            ssrc: 1,
            payload_type: H264_PAYLOAD_TYPE,
            clock_rate: H264_CLOCK_RATE,
        };
        let ticks = config.seconds_to_timestamp(1.5);
        assert_eq!(ticks, 135000);
        assert!((config.timestamp_to_seconds(ticks) - 1.5).abs() < 1e-9);
    }
}
