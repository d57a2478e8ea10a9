//! H.264 decoder wrapper.
//!
//! One openh264 decoder instance per session, fed Annex B NAL units as
//! they come off the depacketizer. The decoded YUV borrows the decoder's
//! internal buffers; frames are handed to the host without copying.

use openh264::decoder::{DecodedYUV, Decoder};
use openh264::formats::YUVSource;

use crate::error::CodecError;
use crate::host::{ColorRange, ColorSpace, VideoFormat, VideoFrame};

/// Stateful H.264 decoder.
pub struct H264Decoder {
    decoder: Decoder,
}

impl H264Decoder {
    pub fn new() -> Result<Self, CodecError> {
        let decoder = Decoder::new().map_err(|e| CodecError::CreateFailed(e.to_string()))?;
        Ok(Self { decoder })
    }

    /// Submit one Annex B unit and drain the ready frame, if any.
    ///
    /// `Ok(None)` means the decoder needs more input (parameter sets, the
    /// rest of a frame); errors leave the decoder usable.
    pub fn decode(&mut self, nalu: &[u8]) -> Result<Option<DecodedYUV<'_>>, CodecError> {
        self.decoder
            .decode(nalu)
            .map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Bind a decoded YUV picture into a host video frame.
///
/// Planes and line sizes point straight into the decoder's buffers; the
/// frame must be delivered before the next decode call.
pub fn video_frame_from_yuv<'a>(yuv: &'a DecodedYUV<'a>, timestamp_ns: u64) -> VideoFrame<'a> {
    let (width, height) = yuv.dimensions();
    let (stride_y, stride_u, stride_v) = yuv.strides();

    VideoFrame {
        format: VideoFormat::I420,
        width: width as u32,
        height: height as u32,
        data: [yuv.y(), yuv.u(), yuv.v()],
        linesize: [stride_y as u32, stride_u as u32, stride_v as u32],
        timestamp_ns,
        colorspace: ColorSpace::default(),
        range: ColorRange::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_survives_garbage_nal() {
        let mut decoder = H264Decoder::new().unwrap();

        // A bogus slice NAL with no parameter sets: refused or ignored,
        // but the decoder stays alive either way.
        let garbage = [0u8, 0, 0, 1, 0x41, 0xFF, 0xFF, 0xFF];
        let _ = decoder.decode(&garbage);
        let _ = decoder.decode(&garbage);
    }
}
