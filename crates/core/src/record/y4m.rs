use super::{
    codec::{EncoderBackend, MediaCapability, SegmentEncoder},
    ExportOptions,
};
use crate::{shader::Frame, Result, VizError};

/// Encoder for the generic capability: 4:4:4 YUV4MPEG2.
#[derive(Debug, Default, Clone, Copy)]
pub struct Y4mBackend;

impl EncoderBackend for Y4mBackend {
    fn name(&self) -> &str {
        "y4m"
    }

    fn supports(&self, capability: MediaCapability) -> bool {
        capability == MediaCapability::Generic
    }

    fn open(
        &self,
        capability: MediaCapability,
        options: &ExportOptions,
    ) -> Result<Box<dyn SegmentEncoder>> {
        if !self.supports(capability) {
            return Err(VizError::UnsupportedCapability(capability.to_string()));
        }
        Ok(Box::new(Y4mEncoder::new(
            options.width,
            options.height,
            options.frame_rate,
        )))
    }
}

#[derive(Debug)]
pub struct Y4mEncoder {
    width: u32,
    height: u32,
    header: Option<Vec<u8>>,
}

impl Y4mEncoder {
    pub fn new(width: u32, height: u32, frame_rate: u32) -> Self {
        let header = format!("YUV4MPEG2 W{width} H{height} F{frame_rate}:1 Ip A1:1 C444\n");
        Self {
            width,
            height,
            header: Some(header.into_bytes()),
        }
    }
}

impl SegmentEncoder for Y4mEncoder {
    fn encode(&mut self, frame: &Frame) -> Result<Vec<u8>> {
        if frame.width != self.width || frame.height != self.height {
            return Err(VizError::Encoder(format!(
                "expected a {}x{} frame, got {}x{}",
                self.width, self.height, frame.width, frame.height
            )));
        }

        let plane = frame.pixels.len() / 4;
        let mut segment = self.header.take().unwrap_or_default();
        segment.reserve(6 + plane * 3);
        segment.extend_from_slice(b"FRAME\n");

        let start = segment.len();
        segment.resize(start + plane * 3, 0);
        let (y, rest) = segment[start..].split_at_mut(plane);
        let (u, v) = rest.split_at_mut(plane);
        for (index, rgba) in frame.pixels.chunks_exact(4).enumerate() {
            let [luma, cb, cr] = rgb_to_ycbcr(rgba[0], rgba[1], rgba[2]);
            y[index] = luma;
            u[index] = cb;
            v[index] = cr;
        }
        Ok(segment)
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>> {
        Ok(self.header.unwrap_or_default())
    }
}

/// BT.601 studio-range conversion.
fn rgb_to_ycbcr(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));
    let y = 16.0 + (65.481 * r + 128.553 * g + 24.966 * b) / 255.0;
    let cb = 128.0 + (-37.797 * r - 74.203 * g + 112.0 * b) / 255.0;
    let cr = 128.0 + (112.0 * r - 93.786 * g - 18.214 * b) / 255.0;
    [y, cb, cr].map(|value| value.round().clamp(0.0, 255.0) as u8)
}
