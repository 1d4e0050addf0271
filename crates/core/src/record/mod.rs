use std::{
    fs,
    path::{Path, PathBuf},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::{
    shader::Frame,
    tier::SubscriptionTier,
    timeline::frame_interval,
    Result, VizError,
};

mod codec;
mod ffmpeg;
mod y4m;

pub use codec::{negotiate, EncoderBackend, MediaCapability, SegmentEncoder};
pub use ffmpeg::{parse_encoder_list, FfmpegBackend};
pub use y4m::{Y4mBackend, Y4mEncoder};

pub const DEFAULT_BITRATE: u32 = 2_500_000;

/// Frames buffered between the render tick and the encoding worker.
const CAPTURE_QUEUE: usize = 8;

/// Parameters of one export job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub duration_seconds: u32,
    /// Video bits per second.
    pub bitrate: u32,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate: 30,
            duration_seconds: 10,
            bitrate: DEFAULT_BITRATE,
        }
    }
}

impl ExportOptions {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(VizError::invalid("export size must not be zero"));
        }
        if self.frame_rate == 0 {
            return Err(VizError::invalid("export frame rate must not be zero"));
        }
        if self.duration_seconds == 0 {
            return Err(VizError::invalid("export duration must not be zero"));
        }
        if self.bitrate == 0 {
            return Err(VizError::invalid("export bitrate must not be zero"));
        }
        Ok(())
    }

    /// Expected artifact size in bytes at the requested bitrate.
    pub fn estimated_size(&self) -> u64 {
        u64::from(self.duration_seconds) * u64::from(self.bitrate) / 8
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.duration_seconds))
    }
}

/// A finished export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub capability: MediaCapability,
    pub filename: String,
    pub frames: u64,
    pub duration: Duration,
}

impl Artifact {
    pub fn mime_type(&self) -> &'static str {
        self.capability.mime_type()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

struct ActiveJob {
    options: ExportOptions,
    capability: MediaCapability,
    frames: Option<Sender<Frame>>,
    done: Receiver<Result<Artifact>>,
    worker: Option<JoinHandle<()>>,
    interval: Duration,
    next_capture: Option<Instant>,
    deadline: Instant,
}

impl ActiveJob {
    fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("export worker panicked");
            }
        }
    }
}

/// Captures rendered frames into a single video artifact.
///
/// Encoding happens on a worker thread fed through a small bounded queue; a
/// full queue drops the frame instead of stalling the render tick. The worker
/// finalizes by itself once the job's duration has elapsed, and the result
/// is held until someone claims it.
pub struct ExportPipeline {
    tier: SubscriptionTier,
    backends: Vec<Box<dyn EncoderBackend>>,
    job: Option<ActiveJob>,
    finished: Option<Result<Artifact>>,
}

impl ExportPipeline {
    pub fn new(tier: SubscriptionTier, backends: Vec<Box<dyn EncoderBackend>>) -> Self {
        Self {
            tier,
            backends,
            job: None,
            finished: None,
        }
    }

    /// ffmpeg when it can be found, then the generic encoder.
    pub fn with_defaults(tier: SubscriptionTier, ffmpeg: Option<&Path>) -> Self {
        let mut backends: Vec<Box<dyn EncoderBackend>> = Vec::new();
        if let Some(backend) = FfmpegBackend::detect(ffmpeg.unwrap_or(Path::new("ffmpeg"))) {
            backends.push(Box::new(backend));
        }
        backends.push(Box::new(Y4mBackend));
        Self::new(tier, backends)
    }

    pub fn tier(&self) -> SubscriptionTier {
        self.tier
    }

    pub fn set_tier(&mut self, tier: SubscriptionTier) {
        self.tier = tier;
    }

    /// The capability the next job would be encoded with.
    pub fn negotiated_capability(&self) -> Option<MediaCapability> {
        negotiate(&self.backends).map(|(capability, _)| capability)
    }

    /// Begins a job. Returns as soon as the encoder is running.
    pub fn start(&mut self, options: ExportOptions) -> Result<()> {
        let policy = self.tier.policy();
        if !policy.export_allowed {
            return Err(VizError::UnsupportedCapability(format!(
                "video export is not available on the {} tier",
                self.tier
            )));
        }
        if options.duration_seconds > policy.max_duration_seconds {
            return Err(VizError::UnsupportedCapability(format!(
                "{}s exceeds the {}s export limit of the {} tier",
                options.duration_seconds, policy.max_duration_seconds, self.tier
            )));
        }
        options.validate()?;

        self.poll();
        if self.job.is_some() {
            return Err(VizError::AlreadyRecording);
        }

        let (capability, index) = negotiate(&self.backends).ok_or_else(|| {
            VizError::UnsupportedCapability("no video encoder available".into())
        })?;
        let encoder = self.backends[index].open(capability, &options)?;

        let (frames_tx, frames_rx) = crossbeam_channel::bounded(CAPTURE_QUEUE);
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let deadline = Instant::now() + options.duration();
        let worker = thread::Builder::new()
            .name("export-encoder".into())
            .spawn(move || {
                let result = run_job(encoder, frames_rx, deadline, options, capability);
                let _ = done_tx.send(result);
            })?;

        tracing::info!(
            %capability,
            width = options.width,
            height = options.height,
            fps = options.frame_rate,
            seconds = options.duration_seconds,
            "export started"
        );
        self.job = Some(ActiveJob {
            options,
            capability,
            frames: Some(frames_tx),
            done: done_rx,
            worker: Some(worker),
            interval: frame_interval(options.frame_rate),
            next_capture: None,
            deadline,
        });
        Ok(())
    }

    /// Finalizes the running job, or hands over the artifact of a job that
    /// already stopped by itself.
    pub fn stop(&mut self) -> Result<Artifact> {
        self.poll();
        if let Some(mut job) = self.job.take() {
            drop(job.frames.take());
            let result = job
                .done
                .recv()
                .unwrap_or_else(|_| Err(VizError::msg("export worker exited without a result")));
            job.join();
            return result;
        }
        self.finished.take().unwrap_or(Err(VizError::NotRecording))
    }

    /// True while a job is capturing.
    pub fn is_recording(&mut self) -> bool {
        self.poll();
        self.job.is_some()
    }

    pub fn active_capability(&self) -> Option<MediaCapability> {
        self.job.as_ref().map(|job| job.capability)
    }

    /// Whether a frame stamped `at` would be captured. Nothing is wanted at
    /// or past the job deadline, even before the worker's result is polled.
    pub fn wants_frame(&self, at: Instant) -> bool {
        match &self.job {
            Some(job) if at < job.deadline => job.next_capture.map_or(true, |next| at >= next),
            _ => false,
        }
    }

    /// Queues `frame` for encoding, throttled to the job frame rate.
    pub fn capture(&mut self, frame: &Frame, at: Instant) {
        self.poll();
        if !self.wants_frame(at) {
            return;
        }
        let Some(job) = self.job.as_mut() else {
            return;
        };
        let Some(frames) = job.frames.as_ref() else {
            return;
        };

        let next = job.next_capture.unwrap_or(at) + job.interval;
        // Resynchronise after a stall instead of bursting.
        job.next_capture = Some(if next < at { at + job.interval } else { next });

        let frame = frame.resized(job.options.width, job.options.height);
        match frames.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => tracing::debug!("encoder busy, dropped capture frame"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Takes the artifact of a job that finished on its own, if any.
    pub fn take_finished(&mut self) -> Result<Option<Artifact>> {
        self.poll();
        self.finished.take().transpose()
    }

    /// Waits up to `timeout` for the running job to finish on its own.
    pub fn wait_finished(&mut self, timeout: Duration) -> Result<Option<Artifact>> {
        if let Some(job) = self.job.as_mut() {
            match job.done.recv_timeout(timeout) {
                Ok(result) => {
                    job.join();
                    self.job = None;
                    self.store_finished(result);
                }
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    job.join();
                    self.job = None;
                    return Err(VizError::msg("export worker exited without a result"));
                }
            }
        }
        self.take_finished()
    }

    fn poll(&mut self) {
        let Some(job) = self.job.as_mut() else {
            return;
        };
        let result = match job.done.try_recv() {
            Ok(result) => result,
            Err(crossbeam_channel::TryRecvError::Empty) => return,
            Err(crossbeam_channel::TryRecvError::Disconnected) => {
                Err(VizError::msg("export worker exited without a result"))
            }
        };
        job.join();
        self.job = None;
        self.store_finished(result);
    }

    fn store_finished(&mut self, result: Result<Artifact>) {
        if let Err(err) = &result {
            tracing::warn!(%err, "export failed");
        }
        if self.finished.replace(result).is_some() {
            tracing::warn!("discarding an unclaimed export artifact");
        }
    }
}

impl Drop for ExportPipeline {
    fn drop(&mut self) {
        if let Some(mut job) = self.job.take() {
            drop(job.frames.take());
            job.join();
        }
    }
}

impl std::fmt::Debug for ExportPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportPipeline")
            .field("tier", &self.tier)
            .field(
                "backends",
                &self.backends.iter().map(|b| b.name()).collect::<Vec<_>>(),
            )
            .field("recording", &self.job.is_some())
            .finish()
    }
}

fn run_job(
    mut encoder: Box<dyn SegmentEncoder>,
    frames: Receiver<Frame>,
    deadline: Instant,
    options: ExportOptions,
    capability: MediaCapability,
) -> Result<Artifact> {
    let started = Instant::now();
    let mut segments: Vec<Vec<u8>> = Vec::new();
    let mut count = 0u64;
    loop {
        match frames.recv_deadline(deadline) {
            Ok(frame) => match encoder.encode(&frame) {
                Ok(segment) => {
                    if !segment.is_empty() {
                        segments.push(segment);
                    }
                    count += 1;
                }
                Err(err) => {
                    tracing::warn!(%err, frames = count, "encoder failed, finalizing what was captured");
                    break;
                }
            },
            Err(RecvTimeoutError::Timeout) => {
                tracing::info!(seconds = options.duration_seconds, "export duration reached, stopping");
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if count == 0 {
        // An artifact always holds at least one frame.
        segments.push(encoder.encode(&Frame::blank(options.width, options.height))?);
        count = 1;
    }
    match encoder.finish() {
        Ok(tail) => segments.push(tail),
        Err(err) if !segments.is_empty() => {
            tracing::warn!(%err, "encoder failed to finalize, keeping the segments encoded so far");
        }
        Err(err) => return Err(err),
    }

    let bytes = segments.concat();
    let filename = format!(
        "visualive-{}.{}",
        chrono::Local::now().format("%Y%m%d-%H%M%S"),
        capability.extension()
    );
    tracing::info!(%capability, frames = count, bytes = bytes.len(), "export finalized");
    Ok(Artifact {
        bytes,
        capability,
        filename,
        frames: count,
        duration: started.elapsed(),
    })
}

/// Writes `artifact` to `path`; a directory receives the artifact filename.
pub fn download_artifact(artifact: &Artifact, path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let target = if path.is_dir() {
        path.join(&artifact.filename)
    } else {
        path.to_path_buf()
    };
    if let Some(parent) = target.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(&target, &artifact.bytes)?;
    tracing::info!(path = %target.display(), bytes = artifact.bytes.len(), "artifact written");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(tier: SubscriptionTier) -> ExportPipeline {
        ExportPipeline::new(tier, vec![Box::new(Y4mBackend)])
    }

    fn options(seconds: u32) -> ExportOptions {
        ExportOptions {
            width: 8,
            height: 8,
            frame_rate: 30,
            duration_seconds: seconds,
            bitrate: DEFAULT_BITRATE,
        }
    }

    #[test]
    fn free_tier_cannot_export() {
        let mut export = pipeline(SubscriptionTier::Free);
        assert!(matches!(
            export.start(options(1)),
            Err(VizError::UnsupportedCapability(_))
        ));
        assert!(!export.is_recording());
    }

    #[test]
    fn duration_is_capped_by_tier() {
        let mut pro = pipeline(SubscriptionTier::Pro);
        assert!(matches!(
            pro.start(options(700)),
            Err(VizError::UnsupportedCapability(_))
        ));

        let mut enterprise = pipeline(SubscriptionTier::Enterprise);
        enterprise.start(options(700)).unwrap();
        assert!(enterprise.is_recording());
        let artifact = enterprise.stop().unwrap();
        assert!(!artifact.is_empty());
    }

    #[test]
    fn one_job_at_a_time() {
        let mut export = pipeline(SubscriptionTier::Pro);
        assert!(matches!(export.stop(), Err(VizError::NotRecording)));

        export.start(options(30)).unwrap();
        assert!(matches!(
            export.start(options(30)),
            Err(VizError::AlreadyRecording)
        ));
        export.stop().unwrap();
        assert!(matches!(export.stop(), Err(VizError::NotRecording)));
    }

    #[test]
    fn stop_flushes_captured_frames() {
        let mut export = pipeline(SubscriptionTier::Pro);
        export.start(options(30)).unwrap();
        let start = Instant::now();
        let frame = Frame::blank(16, 16);
        for i in 0..3 {
            export.capture(&frame, start + Duration::from_millis(100 * i));
        }
        let artifact = export.stop().unwrap();

        assert_eq!(artifact.capability, MediaCapability::Generic);
        assert_eq!(artifact.mime_type(), "video/x-yuv4mpeg");
        assert!(artifact.filename.ends_with(".y4m"));
        assert_eq!(artifact.frames, 3);
        let frame_bytes = b"FRAME\n".len() + 8 * 8 * 3;
        assert!(artifact.bytes.starts_with(b"YUV4MPEG2 W8 H8 F30:1"));
        assert_eq!(
            artifact.len(),
            b"YUV4MPEG2 W8 H8 F30:1 Ip A1:1 C444\n".len() + 3 * frame_bytes
        );
    }

    /// Emits one byte per frame and fails on the third.
    struct FlakyBackend;

    struct FlakyEncoder {
        frames: u8,
    }

    impl EncoderBackend for FlakyBackend {
        fn name(&self) -> &str {
            "flaky"
        }

        fn supports(&self, capability: MediaCapability) -> bool {
            capability == MediaCapability::Generic
        }

        fn open(&self, _: MediaCapability, _: &ExportOptions) -> Result<Box<dyn SegmentEncoder>> {
            Ok(Box::new(FlakyEncoder { frames: 0 }))
        }
    }

    impl SegmentEncoder for FlakyEncoder {
        fn encode(&mut self, _: &Frame) -> Result<Vec<u8>> {
            self.frames += 1;
            if self.frames == 3 {
                return Err(VizError::Encoder("disk full".into()));
            }
            Ok(vec![self.frames])
        }

        fn finish(self: Box<Self>) -> Result<Vec<u8>> {
            Ok(vec![9])
        }
    }

    #[test]
    fn encoder_failure_keeps_earlier_segments() {
        let mut export = ExportPipeline::new(SubscriptionTier::Pro, vec![Box::new(FlakyBackend)]);
        export.start(options(30)).unwrap();
        let start = Instant::now();
        let frame = Frame::blank(8, 8);
        for i in 0..4 {
            export.capture(&frame, start + Duration::from_millis(100 * i));
        }

        let artifact = export.stop().unwrap();
        assert_eq!(artifact.bytes, vec![1, 2, 9]);
        assert_eq!(artifact.frames, 2);
    }

    #[test]
    fn frames_past_the_deadline_are_not_wanted() {
        let mut export = pipeline(SubscriptionTier::Pro);
        let before = Instant::now();
        export.start(options(1)).unwrap();

        assert!(export.wants_frame(Instant::now()));
        assert!(!export.wants_frame(before + Duration::from_secs(2)));
        export.capture(&Frame::blank(8, 8), before + Duration::from_secs(2));
        assert_eq!(export.stop().unwrap().frames, 1);
    }

    #[test]
    fn captures_are_throttled_to_the_export_rate() {
        let mut export = pipeline(SubscriptionTier::Pro);
        export.start(options(30)).unwrap();
        let start = Instant::now();
        let frame = Frame::blank(8, 8);
        export.capture(&frame, start);
        assert!(!export.wants_frame(start + Duration::from_millis(5)));
        export.capture(&frame, start + Duration::from_millis(5));
        assert!(export.wants_frame(start + Duration::from_millis(40)));

        assert_eq!(export.stop().unwrap().frames, 1);
    }

    #[test]
    fn auto_stops_after_the_duration() {
        let mut export = pipeline(SubscriptionTier::Pro);
        let started = Instant::now();
        export.start(options(2)).unwrap();
        export.capture(&Frame::blank(8, 8), Instant::now());

        let artifact = export
            .wait_finished(Duration::from_secs(10))
            .unwrap()
            .expect("job should finish on its own");
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(!artifact.is_empty());
        assert!(!export.is_recording());
        assert!(matches!(export.stop(), Err(VizError::NotRecording)));
    }

    #[test]
    fn auto_stopped_artifact_is_returned_by_stop() {
        let mut export = pipeline(SubscriptionTier::Pro);
        export.start(options(1)).unwrap();
        thread::sleep(Duration::from_millis(1500));
        assert!(!export.wants_frame(Instant::now()));

        let artifact = export.stop().unwrap();
        assert_eq!(artifact.frames, 1);
        assert!(!artifact.is_empty());
    }

    #[test]
    fn invalid_options_are_rejected() {
        let mut export = pipeline(SubscriptionTier::Pro);
        let mut zero = options(5);
        zero.frame_rate = 0;
        assert!(matches!(export.start(zero), Err(VizError::InvalidInput(_))));
    }

    #[test]
    fn estimates_size_from_bitrate() {
        assert_eq!(options(8).estimated_size(), 8 * 2_500_000 / 8);
    }

    #[test]
    fn download_writes_into_directories() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = Artifact {
            bytes: vec![1, 2, 3],
            capability: MediaCapability::Generic,
            filename: "clip.y4m".into(),
            frames: 1,
            duration: Duration::from_secs(1),
        };
        let written = download_artifact(&artifact, dir.path()).unwrap();
        assert_eq!(written, dir.path().join("clip.y4m"));
        assert_eq!(fs::read(written).unwrap(), vec![1, 2, 3]);
    }
}
