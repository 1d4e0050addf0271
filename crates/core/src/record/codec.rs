use std::fmt;

use serde::{Deserialize, Serialize};

use super::ExportOptions;
use crate::{shader::Frame, Result};

/// Container and codec combination an artifact is encoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MediaCapability {
    WebmVp9Opus,
    WebmVp8Opus,
    MatroskaH264Opus,
    /// Uncompressed YUV4MPEG2 stream, always available.
    Generic,
}

impl MediaCapability {
    /// Most preferred first.
    pub const PREFERENCE: [MediaCapability; 4] = [
        MediaCapability::WebmVp9Opus,
        MediaCapability::WebmVp8Opus,
        MediaCapability::MatroskaH264Opus,
        MediaCapability::Generic,
    ];

    pub fn mime_type(self) -> &'static str {
        match self {
            MediaCapability::WebmVp9Opus => "video/webm;codecs=vp9,opus",
            MediaCapability::WebmVp8Opus => "video/webm;codecs=vp8,opus",
            MediaCapability::MatroskaH264Opus => "video/x-matroska;codecs=h264,opus",
            MediaCapability::Generic => "video/x-yuv4mpeg",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            MediaCapability::WebmVp9Opus | MediaCapability::WebmVp8Opus => "webm",
            MediaCapability::MatroskaH264Opus => "mkv",
            MediaCapability::Generic => "y4m",
        }
    }
}

impl fmt::Display for MediaCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// Something that can turn frames into one or more media capabilities.
pub trait EncoderBackend: Send {
    fn name(&self) -> &str;

    fn supports(&self, capability: MediaCapability) -> bool;

    fn open(
        &self,
        capability: MediaCapability,
        options: &ExportOptions,
    ) -> Result<Box<dyn SegmentEncoder>>;
}

/// One running encode. Lives on the export worker thread.
pub trait SegmentEncoder: Send {
    /// Encodes one frame of the job size and returns whatever encoded bytes
    /// became available, possibly none.
    fn encode(&mut self, frame: &Frame) -> Result<Vec<u8>>;

    /// Flushes the encoder and returns the trailing bytes.
    fn finish(self: Box<Self>) -> Result<Vec<u8>>;
}

/// Picks the most preferred capability some backend supports, together with
/// the index of that backend.
pub fn negotiate(backends: &[Box<dyn EncoderBackend>]) -> Option<(MediaCapability, usize)> {
    MediaCapability::PREFERENCE.into_iter().find_map(|capability| {
        backends
            .iter()
            .position(|backend| backend.supports(capability))
            .map(|index| (capability, index))
    })
}
