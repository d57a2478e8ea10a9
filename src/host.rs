//! Host-facing types: raw frames, frame sinks, output signals, settings.
//!
//! The studio host's plugin registry, renderer and encoder machinery live
//! outside this crate. Everything the pipeline needs from them is narrowed
//! to the traits and plain data types in this module: a frame sink for the
//! WHEP source, an output-host handle for the WHIP output, and the settings
//! schema both expose to the configuration UI.

use bytes::Bytes;

// ============================================================================
// Settings & properties
// ============================================================================

/// Connection settings supplied by the host configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    /// WHIP/WHEP endpoint URL
    pub endpoint_url: String,
    /// Bearer token, empty for unauthenticated endpoints
    pub bearer_token: String,
}

/// Kind of a configuration property, mirrors the host's text widgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Text,
    Password,
}

/// One entry of the configuration schema.
#[derive(Debug, Clone)]
pub struct Property {
    pub name: &'static str,
    pub label: &'static str,
    pub kind: PropertyKind,
}

/// The configuration schema shared by the WHEP source and WHIP output.
pub fn properties() -> Vec<Property> {
    vec![
        Property {
            name: "endpoint_url",
            label: "URL",
            kind: PropertyKind::Text,
        },
        Property {
            name: "bearer_token",
            label: "Bearer Token",
            kind: PropertyKind::Password,
        },
    ]
}

// ============================================================================
// Output signals
// ============================================================================

/// Stop reasons reported to the host when an output session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// Clean stop requested by the host
    Success,
    /// No endpoint URL configured
    BadPath,
    /// Signaling endpoint unreachable or unusable
    ConnectFailed,
    /// Endpoint reachable but rejected the offer
    InvalidStream,
    /// Peer connection dropped after being established
    Disconnected,
    /// The host encoder stopped delivering packets
    EncodeError,
    /// Any other fatal error
    Error,
}

// ============================================================================
// Media frames
// ============================================================================

/// Video pixel formats delivered to the host.
///
/// The decode pipeline only ever produces planar 4:2:0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFormat {
    I420,
}

/// Color space of a delivered frame; `Default` leaves the choice to the
/// host renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSpace {
    #[default]
    Default,
    Bt601,
    Bt709,
}

/// Color range of a delivered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorRange {
    #[default]
    Default,
    Partial,
    Full,
}

/// Audio sample formats, matching the host's frame structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    U8,
    S16,
    S32,
    Flt,
    U8P,
    S16P,
    S32P,
    FltP,
    Unknown,
}

/// Speaker layouts, matching the host's frame structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerLayout {
    Mono,
    Stereo,
    TwoPointOne,
    FourPointZero,
    FourPointOne,
    FivePointOne,
    SevenPointOne,
    Unknown,
}

/// Map a decoder channel count onto the host speaker layout.
pub fn speaker_layout_from_channels(channels: u16) -> SpeakerLayout {
    match channels {
        1 => SpeakerLayout::Mono,
        2 => SpeakerLayout::Stereo,
        3 => SpeakerLayout::TwoPointOne,
        4 => SpeakerLayout::FourPointZero,
        5 => SpeakerLayout::FourPointOne,
        6 => SpeakerLayout::FivePointOne,
        8 => SpeakerLayout::SevenPointOne,
        _ => SpeakerLayout::Unknown,
    }
}

/// One decoded video frame. Planes borrow the decoder's internal buffers,
/// so the frame is only valid for the duration of the sink call.
#[derive(Debug)]
pub struct VideoFrame<'a> {
    pub format: VideoFormat,
    pub width: u32,
    pub height: u32,
    /// Y, U, V planes
    pub data: [&'a [u8]; 3],
    /// Line sizes of the three planes in bytes
    pub linesize: [u32; 3],
    /// Presentation timestamp in nanoseconds
    pub timestamp_ns: u64,
    pub colorspace: ColorSpace,
    pub range: ColorRange,
}

/// One decoded audio frame, interleaved samples borrowed from the decoder.
#[derive(Debug)]
pub struct AudioFrame<'a> {
    pub sample_rate: u32,
    pub format: SampleFormat,
    pub layout: SpeakerLayout,
    pub data: &'a [f32],
    pub samples_per_channel: u32,
    /// RTP timestamp of the packet the frame was decoded from
    pub timestamp: u64,
}

/// Destination for decoded frames, implemented by the host (WHEP).
pub trait FrameSink: Send + Sync + 'static {
    fn output_video(&self, frame: &VideoFrame<'_>);
    fn output_audio(&self, frame: &AudioFrame<'_>);
}

// ============================================================================
// Encoded packets (WHIP)
// ============================================================================

/// Medium of an encoded packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// One packet from the host encoder, handed to the WHIP output.
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    pub kind: MediaKind,
    pub data: Bytes,
    /// Decode timestamp in microseconds
    pub dts_usec: i64,
}

/// Host-side service handle for the WHIP output: connect info, capture
/// lifecycle, and the stop signal channel.
pub trait OutputHost: Send + Sync + 'static {
    /// Endpoint URL from the configured service
    fn endpoint_url(&self) -> String;
    /// Bearer token from the configured service, empty when absent
    fn bearer_token(&self) -> String;
    /// Whether the host is ready to begin data capture
    fn can_begin_data_capture(&self) -> bool;
    /// Ask the host to initialize its encoders
    fn initialize_encoders(&self) -> bool;
    /// Start the flow of encoded packets
    fn begin_data_capture(&self);
    /// Report the end of the session with a reason
    fn signal_stop(&self, signal: StopSignal);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speaker_layout_mapping() {
        assert_eq!(speaker_layout_from_channels(1), SpeakerLayout::Mono);
        assert_eq!(speaker_layout_from_channels(2), SpeakerLayout::Stereo);
        assert_eq!(speaker_layout_from_channels(3), SpeakerLayout::TwoPointOne);
        assert_eq!(speaker_layout_from_channels(4), SpeakerLayout::FourPointZero);
        assert_eq!(speaker_layout_from_channels(5), SpeakerLayout::FourPointOne);
        assert_eq!(speaker_layout_from_channels(6), SpeakerLayout::FivePointOne);
        assert_eq!(speaker_layout_from_channels(8), SpeakerLayout::SevenPointOne);
        assert_eq!(speaker_layout_from_channels(7), SpeakerLayout::Unknown);
        assert_eq!(speaker_layout_from_channels(0), SpeakerLayout::Unknown);
    }

    #[test]
    fn test_properties_schema() {
        let props = properties();
        assert_eq!(props.len(), 2);
        assert_eq!(props[0].name, "endpoint_url");
        assert_eq!(props[0].kind, PropertyKind::Text);
        assert_eq!(props[1].name, "bearer_token");
        assert_eq!(props[1].kind, PropertyKind::Password);
    }
}
