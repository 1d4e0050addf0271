use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use super::LinkedProgram;
use crate::{Result, VizError};

/// GPU device the binder draws through.
///
/// A `Program` owns every GPU object created for it and releases them when
/// dropped, so replacing or destroying a bound program cannot leak.
pub trait GpuBackend {
    type Program;

    /// Builds a pipeline for an already linked program. Failures leave the
    /// backend untouched.
    fn create_program(&mut self, program: &LinkedProgram) -> Result<Self::Program>;

    /// Uploads the whole uniform block, then issues one full-screen draw.
    fn draw(&mut self, program: &Self::Program, uniforms: &[u8]) -> Result<()>;

    /// Reads back the most recently drawn frame.
    fn read_frame(&mut self) -> Result<Frame>;

    fn size(&self) -> (u32, u32);
}

/// Tightly packed RGBA8 image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(VizError::invalid(format!(
                "frame of {width}x{height} needs {expected} bytes, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Opaque black.
    pub fn blank(width: u32, height: u32) -> Self {
        let pixels = [0u8, 0, 0, 255].repeat(width as usize * height as usize);
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let start = (y as usize * self.width as usize + x as usize) * 4;
        let mut rgba = [0; 4];
        rgba.copy_from_slice(&self.pixels[start..start + 4]);
        Some(rgba)
    }

    /// The colour shared by every pixel, if the frame is a single colour.
    pub fn uniform_color(&self) -> Option<[u8; 4]> {
        let first = self.pixel(0, 0)?;
        self.pixels
            .chunks_exact(4)
            .all(|rgba| rgba == first)
            .then_some(first)
    }

    /// Nearest-neighbour rescale.
    pub fn resized(&self, width: u32, height: u32) -> Frame {
        if width == self.width && height == self.height {
            return self.clone();
        }
        if self.width == 0 || self.height == 0 {
            return Frame::blank(width, height);
        }
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            let src_y = (u64::from(y) * u64::from(self.height) / u64::from(height.max(1))) as usize;
            for x in 0..width {
                let src_x =
                    (u64::from(x) * u64::from(self.width) / u64::from(width.max(1))) as usize;
                let start = (src_y * self.width as usize + src_x) * 4;
                pixels.extend_from_slice(&self.pixels[start..start + 4]);
            }
        }
        Frame {
            width,
            height,
            pixels,
        }
    }
}

/// Program handle of the [`HeadlessBackend`].
#[derive(Debug)]
pub struct HeadlessProgram {
    id: u64,
    live: Arc<AtomicUsize>,
}

impl HeadlessProgram {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for HeadlessProgram {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One draw call seen by the [`HeadlessBackend`].
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub program: u64,
    pub uniforms: Vec<u8>,
}

/// Backend without a device. Draws are recorded, readback is blank.
#[derive(Debug)]
pub struct HeadlessBackend {
    width: u32,
    height: u32,
    next_id: u64,
    live: Arc<AtomicUsize>,
    draws: usize,
    last_draw: Option<DrawRecord>,
    reject_next: Option<String>,
}

impl HeadlessBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            next_id: 0,
            live: Arc::new(AtomicUsize::new(0)),
            draws: 0,
            last_draw: None,
            reject_next: None,
        }
    }

    /// Number of program handles not yet dropped.
    pub fn live_programs(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn draw_count(&self) -> usize {
        self.draws
    }

    pub fn last_draw(&self) -> Option<&DrawRecord> {
        self.last_draw.as_ref()
    }

    /// Makes the next `create_program` fail the way a driver rejecting the
    /// pipeline would.
    pub fn reject_next_program(&mut self, log: impl Into<String>) {
        self.reject_next = Some(log.into());
    }
}

impl GpuBackend for HeadlessBackend {
    type Program = HeadlessProgram;

    fn create_program(&mut self, _program: &LinkedProgram) -> Result<HeadlessProgram> {
        if let Some(log) = self.reject_next.take() {
            return Err(VizError::LinkError { log });
        }
        self.next_id += 1;
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(HeadlessProgram {
            id: self.next_id,
            live: Arc::clone(&self.live),
        })
    }

    fn draw(&mut self, program: &HeadlessProgram, uniforms: &[u8]) -> Result<()> {
        self.draws += 1;
        self.last_draw = Some(DrawRecord {
            program: program.id,
            uniforms: uniforms.to_vec(),
        });
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame> {
        Ok(Frame::blank(self.width, self.height))
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
