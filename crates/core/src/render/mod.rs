use std::{
    collections::VecDeque,
    fmt,
    time::{Duration, Instant},
};

use crate::{
    analysis::AudioBands,
    audio::SpectralAnalyzer,
    mapping::MappingMatrix,
    presets::{Preset, PresetStore},
    record::ExportPipeline,
    shader::{GpuBackend, ShaderBinder},
    timeline::{FrameRequest, FrameScheduler, ManualScheduler, PacedScheduler},
    VizError,
};

mod stats;

pub use stats::{FrameStats, HISTORY_LEN, LOW_FPS};

/// Number of reported errors kept for [`RenderLoop::recent_errors`].
pub const ERROR_LOG_LEN: usize = 32;

type ErrorCallback = Box<dyn FnMut(&VizError)>;

/// One stored version of a preset.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PresetVersion {
    id: String,
    revision: u64,
}

impl PresetVersion {
    fn is(&self, id: &str, revision: u64) -> bool {
        self.revision == revision && self.id == id
    }
}

/// Drives one rendering surface: each tick samples the analyzer, derives
/// uniforms for the active preset, and draws.
///
/// The loop owns exactly one outstanding frame request while running. Ticks
/// never fail; errors go to the side channel (log, bounded history and an
/// optional callback) and the surface keeps drawing the last good program
/// with idle inputs.
pub struct RenderLoop<B: GpuBackend, S: FrameScheduler> {
    analyzer: SpectralAnalyzer,
    presets: PresetStore,
    binder: ShaderBinder<B>,
    scheduler: S,
    mapping: MappingMatrix,
    running: bool,
    pending: Option<FrameRequest>,
    started: Option<Instant>,
    bound: Option<Preset>,
    bound_version: Option<PresetVersion>,
    failed: Option<PresetVersion>,
    last_bands: AudioBands,
    stats: FrameStats,
    export: Option<ExportPipeline>,
    errors: VecDeque<String>,
    on_error: Option<ErrorCallback>,
}

impl<B: GpuBackend, S: FrameScheduler> RenderLoop<B, S> {
    pub fn new(
        analyzer: SpectralAnalyzer,
        presets: PresetStore,
        binder: ShaderBinder<B>,
        scheduler: S,
    ) -> Self {
        Self {
            analyzer,
            presets,
            binder,
            scheduler,
            mapping: MappingMatrix::new(),
            running: false,
            pending: None,
            started: None,
            bound: None,
            bound_version: None,
            failed: None,
            last_bands: AudioBands::SILENT,
            stats: FrameStats::new(),
            export: None,
            errors: VecDeque::with_capacity(ERROR_LOG_LEN),
            on_error: None,
        }
    }

    /// Requests the first frame. The loop clock starts at the first tick.
    pub fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        self.started = None;
        self.stats.reset();
        self.pending = Some(self.scheduler.request_frame());
        tracing::info!(preset = ?self.presets.active_id(), "render loop started");
    }

    /// Cancels the outstanding frame request. No draw happens after this
    /// returns until the next [`start`](Self::start).
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        if let Some(request) = self.pending.take() {
            self.scheduler.cancel_frame(request);
        }
        tracing::info!(frames = self.stats.total_frames(), "render loop stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Entry point for a fired frame request. Stale requests and requests
    /// arriving after [`stop`](Self::stop) are ignored. Returns whether a
    /// tick ran.
    pub fn on_frame(&mut self, request: FrameRequest, at: Instant) -> bool {
        if !self.running || self.pending != Some(request) {
            tracing::trace!(request = request.id(), "ignoring stale frame request");
            return false;
        }
        self.pending = None;
        self.tick(at);
        if self.running {
            self.pending = Some(self.scheduler.request_frame());
        }
        true
    }

    /// Runs one frame stamped `at`.
    pub fn tick(&mut self, at: Instant) {
        let started = *self.started.get_or_insert(at);
        self.sync_program();

        let bands = self.sample_bands();
        self.last_bands = bands;

        let Some(preset) = self.bound.as_ref() else {
            return;
        };
        let elapsed = at.saturating_duration_since(started);
        // Every uniform of the frame is staged before the draw below.
        for update in self.mapping.evaluate(preset, &bands, elapsed) {
            self.binder.set_uniform(&update.target, update.value);
        }

        if let Err(err) = self.binder.render() {
            self.report(err);
            return;
        }
        self.stats.record(at);

        let captured = match self.export.as_mut() {
            Some(export) if export.wants_frame(at) => self
                .binder
                .read_frame()
                .map(|frame| export.capture(&frame, at)),
            _ => Ok(()),
        };
        if let Err(err) = captured {
            self.report(err);
        }
    }

    /// Compiles the active preset when it differs from what is bound. A
    /// preset that failed is not retried until it changes.
    fn sync_program(&mut self) {
        let Some((active, revision)) = self.presets.active_revision() else {
            return;
        };
        let seen = |version: &Option<PresetVersion>| {
            version
                .as_ref()
                .is_some_and(|version| version.is(&active.id, revision))
        };
        if seen(&self.bound_version) || seen(&self.failed) {
            return;
        }

        let version = PresetVersion {
            id: active.id.clone(),
            revision,
        };
        let active = active.clone();
        match self.binder.compile(&active) {
            Ok(()) => {
                self.bound = Some(active);
                self.bound_version = Some(version);
                self.failed = None;
            }
            Err(err) => {
                tracing::warn!(preset = %active.id, revision, "keeping previous shader program");
                self.failed = Some(version);
                self.report(err);
            }
        }
    }

    fn sample_bands(&mut self) -> AudioBands {
        match self.analyzer.sample_bands() {
            Ok(bands) => bands,
            Err(VizError::NotInitialized) => AudioBands::SILENT,
            Err(err) => {
                self.report(err);
                AudioBands::SILENT
            }
        }
    }

    fn report(&mut self, err: VizError) {
        tracing::warn!(%err, "render loop error");
        if let Some(callback) = self.on_error.as_mut() {
            callback(&err);
        }
        if self.errors.len() == ERROR_LOG_LEN {
            self.errors.pop_front();
        }
        self.errors.push_back(err.to_string());
    }

    /// Called with every error the loop absorbs.
    pub fn set_error_callback(&mut self, callback: impl FnMut(&VizError) + 'static) {
        self.on_error = Some(Box::new(callback));
    }

    /// Most recent absorbed errors, oldest first.
    pub fn recent_errors(&self) -> impl Iterator<Item = &str> + '_ {
        self.errors.iter().map(String::as_str)
    }

    pub fn attach_export(&mut self, export: ExportPipeline) {
        self.export = Some(export);
    }

    pub fn detach_export(&mut self) -> Option<ExportPipeline> {
        self.export.take()
    }

    pub fn export(&self) -> Option<&ExportPipeline> {
        self.export.as_ref()
    }

    pub fn export_mut(&mut self) -> Option<&mut ExportPipeline> {
        self.export.as_mut()
    }

    /// Stops the loop, releases the program and detaches the audio source.
    pub fn shutdown(&mut self) {
        self.stop();
        self.binder.destroy();
        self.bound = None;
        self.bound_version = None;
        self.failed = None;
        self.analyzer.detach();
    }

    /// Time since the first tick after the last start.
    pub fn elapsed(&self, now: Instant) -> Duration {
        self.started
            .map(|started| now.saturating_duration_since(started))
            .unwrap_or_default()
    }

    pub fn last_bands(&self) -> AudioBands {
        self.last_bands
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn analyzer(&self) -> &SpectralAnalyzer {
        &self.analyzer
    }

    pub fn analyzer_mut(&mut self) -> &mut SpectralAnalyzer {
        &mut self.analyzer
    }

    pub fn presets(&self) -> &PresetStore {
        &self.presets
    }

    pub fn presets_mut(&mut self) -> &mut PresetStore {
        &mut self.presets
    }

    pub fn binder(&self) -> &ShaderBinder<B> {
        &self.binder
    }

    pub fn binder_mut(&mut self) -> &mut ShaderBinder<B> {
        &mut self.binder
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }
}

impl<B: GpuBackend> RenderLoop<B, ManualScheduler> {
    /// Fires the oldest pending request. Returns false when none was pending.
    pub fn pump(&mut self) -> bool {
        match self.scheduler.fire() {
            Some((request, at)) => {
                self.on_frame(request, at);
                true
            }
            None => false,
        }
    }

    pub fn pump_frames(&mut self, frames: usize) -> usize {
        (0..frames).take_while(|_| self.pump()).count()
    }
}

impl<B: GpuBackend, S: PacedScheduler> RenderLoop<B, S> {
    /// Runs paced frames until `frames` ticks ran or the loop stopped.
    pub fn run_frames(&mut self, frames: u64) -> u64 {
        let mut ticks = 0;
        while self.running && ticks < frames {
            let Some((request, at)) = self.scheduler.wait_for_frame() else {
                break;
            };
            if self.on_frame(request, at) {
                ticks += 1;
            }
        }
        ticks
    }

    /// Runs paced frames for `duration` of wall-clock time.
    pub fn run_for(&mut self, duration: Duration) -> u64 {
        let deadline = Instant::now() + duration;
        let mut ticks = 0;
        while self.running && Instant::now() < deadline {
            let Some((request, at)) = self.scheduler.wait_for_frame() else {
                break;
            };
            if self.on_frame(request, at) {
                ticks += 1;
            }
        }
        ticks
    }
}

impl<B, S> fmt::Debug for RenderLoop<B, S>
where
    B: GpuBackend + fmt::Debug,
    S: FrameScheduler + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderLoop")
            .field("running", &self.running)
            .field("pending", &self.pending)
            .field("bound", &self.bound.as_ref().map(|preset| &preset.id))
            .field("binder", &self.binder)
            .field("scheduler", &self.scheduler)
            .field("frames", &self.stats.total_frames())
            .field("export", &self.export)
            .finish()
    }
}
