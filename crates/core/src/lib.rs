//! Core library for the VisuaLive audio-reactive renderer.
//!
//! Each module owns one subsystem: spectral analysis of an audio source,
//! the preset catalog, shader compilation and uniform binding, the render
//! loop that couples them every frame, and the capture/export pipeline.
//! All state is explicitly owned, so several independent surfaces can live
//! side by side.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod mapping;
pub mod presets;
pub mod record;
pub mod render;
pub mod shader;
pub mod tier;
pub mod timeline;

pub use analysis::{AnalysisEngine, AnalysisSettings, AudioBands, BandSplit, FrequencySnapshot};
pub use audio::{AudioBuffer, AudioSource, SourceKind, SpectralAnalyzer};
pub use config::{AppConfig, QualityHint};
pub use error::{Result, VizError};
pub use mapping::{AudioBand, MappingMatrix, ParameterUpdate};
pub use presets::{Preset, PresetPatch, PresetStore};
pub use record::{download_artifact, Artifact, ExportOptions, ExportPipeline, MediaCapability};
pub use render::{FrameStats, RenderLoop};
pub use shader::{Frame, GpuBackend, HeadlessBackend, ShaderBinder, ShaderStage, UniformValue};
pub use tier::{SubscriptionTier, TierPolicy};
pub use timeline::{FrameScheduler, IntervalScheduler, ManualScheduler, PlaybackClock};
