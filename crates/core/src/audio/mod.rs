use std::{path::PathBuf, time::Duration};

use crate::{
    analysis::{time_domain_bytes, AnalysisEngine, AnalysisSettings, AudioBands, FrequencySnapshot},
    Result, VizError,
};

mod file;
#[cfg(feature = "microphone")]
mod microphone;

pub use file::AudioBuffer;

/// Where the analysed audio comes from.
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// Live capture device; `None` selects the host default.
    Microphone { device: Option<String> },
    FileBuffer(FileInput),
}

/// File-backed input, either still on disk or already decoded.
#[derive(Debug, Clone)]
pub enum FileInput {
    Path(PathBuf),
    Decoded(AudioBuffer),
}

impl AudioSource {
    pub fn microphone() -> Self {
        AudioSource::Microphone { device: None }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        AudioSource::FileBuffer(FileInput::Path(path.into()))
    }

    pub fn buffer(buffer: AudioBuffer) -> Self {
        AudioSource::FileBuffer(FileInput::Decoded(buffer))
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            AudioSource::Microphone { .. } => SourceKind::Microphone,
            AudioSource::FileBuffer(_) => SourceKind::FileBuffer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Microphone,
    FileBuffer,
}

/// A live analysis node. Dropping it releases the underlying device.
pub(crate) trait AudioNode {
    fn kind(&self) -> SourceKind;

    /// Begins producing audio. Called once, after any previous node is gone.
    fn start(&mut self) -> Result<()>;

    /// Copies the newest `dest.len()` samples into `dest`, oldest first.
    /// History that does not exist yet reads as silence.
    fn read_window(&self, dest: &mut [f32]);

    /// Silences the node while a replacement starts. It may be resumed if
    /// the replacement fails.
    fn pause(&mut self) {}

    fn resume(&mut self) -> Result<()> {
        Ok(())
    }

    /// Repositions playback. Returns `false` for sources that cannot seek.
    fn seek(&mut self, _position: Duration) -> bool {
        false
    }
}

/// Spectral analyzer bound to at most one audio source at a time.
///
/// Reads never wait for fresh audio: each sample call analyses whatever
/// window the source holds right now.
pub struct SpectralAnalyzer {
    engine: AnalysisEngine,
    node: Option<Box<dyn AudioNode>>,
    window: Vec<f32>,
}

impl SpectralAnalyzer {
    pub fn new(settings: AnalysisSettings) -> Result<Self> {
        let engine = AnalysisEngine::new(settings)?;
        Ok(Self {
            window: vec![0.0; settings.fft_size],
            engine,
            node: None,
        })
    }

    pub fn settings(&self) -> &AnalysisSettings {
        self.engine.settings()
    }

    /// Binds `source`, replacing the current one.
    ///
    /// The new source is opened before the old one is touched. The old node
    /// is paused while the new one starts and released once it has; if the
    /// start fails the old node resumes and stays bound.
    pub fn attach(&mut self, source: AudioSource) -> Result<()> {
        let kind = source.kind();
        let node = self.open(source)?;
        self.attach_node(node)?;
        tracing::info!(?kind, "audio source attached");
        Ok(())
    }

    pub(crate) fn attach_node(&mut self, mut node: Box<dyn AudioNode>) -> Result<()> {
        let mut previous = self.node.take();
        if let Some(previous) = previous.as_mut() {
            previous.pause();
        }

        if let Err(err) = node.start() {
            if let Some(mut previous) = previous {
                match previous.resume() {
                    Ok(()) => self.node = Some(previous),
                    Err(resume_err) => {
                        tracing::warn!(%resume_err, "previous audio source could not be resumed");
                    }
                }
            }
            return Err(err);
        }

        if let Some(previous) = previous {
            tracing::info!(kind = ?previous.kind(), "audio source detached");
        }
        self.engine.reset();
        self.node = Some(node);
        Ok(())
    }

    fn open(&self, source: AudioSource) -> Result<Box<dyn AudioNode>> {
        match source {
            AudioSource::FileBuffer(FileInput::Path(path)) => {
                let buffer = AudioBuffer::from_wav(&path)?;
                Ok(Box::new(file::FileNode::new(buffer)))
            }
            AudioSource::FileBuffer(FileInput::Decoded(buffer)) => {
                Ok(Box::new(file::FileNode::new(buffer)))
            }
            AudioSource::Microphone { device } => self.open_microphone(device.as_deref()),
        }
    }

    #[cfg(feature = "microphone")]
    fn open_microphone(&self, device: Option<&str>) -> Result<Box<dyn AudioNode>> {
        let node = microphone::MicrophoneNode::open(device, self.window.len())?;
        Ok(Box::new(node))
    }

    #[cfg(not(feature = "microphone"))]
    fn open_microphone(&self, _device: Option<&str>) -> Result<Box<dyn AudioNode>> {
        Err(VizError::SourceUnavailable(
            "microphone capture is not compiled in (enable the `microphone` feature)".into(),
        ))
    }

    /// Releases the bound source. Calling it with nothing attached is a no-op.
    pub fn detach(&mut self) {
        if let Some(node) = self.node.take() {
            tracing::info!(kind = ?node.kind(), "audio source detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.node.is_some()
    }

    pub fn source_kind(&self) -> Option<SourceKind> {
        self.node.as_ref().map(|node| node.kind())
    }

    /// Moves a file source to `position`. Live sources ignore it.
    pub fn seek(&mut self, position: Duration) -> Result<()> {
        let node = self.node.as_mut().ok_or(VizError::NotInitialized)?;
        if !node.seek(position) {
            tracing::debug!(kind = ?node.kind(), "source does not support seeking");
        }
        Ok(())
    }

    pub fn sample_frequency(&mut self) -> Result<FrequencySnapshot> {
        let node = self.node.as_ref().ok_or(VizError::NotInitialized)?;
        node.read_window(&mut self.window);
        self.engine.analyse(&self.window)
    }

    pub fn sample_bands(&mut self) -> Result<AudioBands> {
        let split = self.engine.settings().band_split;
        Ok(self.sample_frequency()?.bands(split))
    }

    pub fn sample_time_domain(&mut self) -> Result<Vec<u8>> {
        let node = self.node.as_ref().ok_or(VizError::NotInitialized)?;
        node.read_window(&mut self.window);
        Ok(time_domain_bytes(&self.window))
    }
}

impl std::fmt::Debug for SpectralAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralAnalyzer")
            .field("engine", &self.engine)
            .field("source", &self.source_kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        f32::consts::PI,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use super::*;

    fn analyzer() -> SpectralAnalyzer {
        SpectralAnalyzer::new(AnalysisSettings::default()).unwrap()
    }

    struct CountingNode {
        dropped: Arc<AtomicUsize>,
    }

    impl AudioNode for CountingNode {
        fn kind(&self) -> SourceKind {
            SourceKind::Microphone
        }

        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        fn read_window(&self, dest: &mut [f32]) {
            dest.iter_mut().for_each(|slot| *slot = 0.0);
        }
    }

    impl Drop for CountingNode {
        fn drop(&mut self) {
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FailingNode;

    impl AudioNode for FailingNode {
        fn kind(&self) -> SourceKind {
            SourceKind::Microphone
        }

        fn start(&mut self) -> Result<()> {
            Err(VizError::SourceUnavailable("device busy".into()))
        }

        fn read_window(&self, dest: &mut [f32]) {
            dest.iter_mut().for_each(|slot| *slot = 1.0);
        }
    }

    #[test]
    fn failed_start_keeps_previous_source() {
        let mut analyzer = analyzer();
        let dropped = Arc::new(AtomicUsize::new(0));
        analyzer
            .attach_node(Box::new(CountingNode {
                dropped: dropped.clone(),
            }))
            .unwrap();

        let err = analyzer.attach_node(Box::new(FailingNode)).unwrap_err();
        assert!(matches!(err, VizError::SourceUnavailable(_)));
        assert!(analyzer.is_attached());
        assert_eq!(dropped.load(Ordering::SeqCst), 0);
        assert_eq!(analyzer.sample_bands().unwrap(), AudioBands::SILENT);
    }

    #[test]
    fn reads_fail_before_attach() {
        let mut analyzer = analyzer();
        assert!(matches!(analyzer.sample_bands(), Err(VizError::NotInitialized)));
        assert!(matches!(
            analyzer.sample_frequency(),
            Err(VizError::NotInitialized)
        ));
        assert!(matches!(
            analyzer.sample_time_domain(),
            Err(VizError::NotInitialized)
        ));
    }

    #[test]
    fn silent_buffer_yields_zero_bands() {
        let mut analyzer = analyzer();
        let silence = AudioBuffer::silent(44_100, Duration::from_secs(2));
        analyzer.attach(AudioSource::buffer(silence)).unwrap();

        let bands = analyzer.sample_bands().unwrap();
        assert_eq!(bands, AudioBands::SILENT);
        assert_eq!(analyzer.sample_frequency().unwrap().len(), 1024);
    }

    #[test]
    fn tone_registers_in_the_bass_band() {
        let mut analyzer = analyzer();
        let rate = 44_100;
        let samples = (0..rate * 4)
            .map(|i| 0.5 * (2.0 * PI * 220.0 * i as f32 / rate as f32).sin())
            .collect();
        analyzer
            .attach(AudioSource::buffer(AudioBuffer::new(rate, samples)))
            .unwrap();
        analyzer.seek(Duration::from_secs(1)).unwrap();

        let bands = analyzer.sample_bands().unwrap();
        assert!(bands.bass > bands.high);
        assert!(bands.bass > 0.0);
    }

    #[test]
    fn detach_is_idempotent() {
        let mut analyzer = analyzer();
        analyzer
            .attach(AudioSource::buffer(AudioBuffer::silent(8_000, Duration::from_secs(1))))
            .unwrap();

        analyzer.detach();
        assert!(!analyzer.is_attached());
        analyzer.detach();
        assert!(!analyzer.is_attached());
        assert!(matches!(analyzer.sample_bands(), Err(VizError::NotInitialized)));
    }

    #[test]
    fn replacing_a_source_releases_the_previous_node() {
        let mut analyzer = analyzer();
        let dropped = Arc::new(AtomicUsize::new(0));
        analyzer
            .attach_node(Box::new(CountingNode {
                dropped: dropped.clone(),
            }))
            .unwrap();
        assert_eq!(dropped.load(Ordering::SeqCst), 0);

        analyzer
            .attach(AudioSource::buffer(AudioBuffer::silent(8_000, Duration::from_secs(1))))
            .unwrap();
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        assert_eq!(analyzer.source_kind(), Some(SourceKind::FileBuffer));
    }

    #[test]
    fn failed_attach_keeps_previous_source() {
        let mut analyzer = analyzer();
        analyzer
            .attach(AudioSource::buffer(AudioBuffer::silent(8_000, Duration::from_secs(1))))
            .unwrap();

        let err = analyzer
            .attach(AudioSource::file("/no/such/file.wav"))
            .unwrap_err();
        assert!(matches!(err, VizError::SourceUnavailable(_)));
        assert_eq!(analyzer.source_kind(), Some(SourceKind::FileBuffer));
        assert!(analyzer.sample_bands().is_ok());
    }

    #[cfg(not(feature = "microphone"))]
    #[test]
    fn microphone_without_backend_is_unavailable() {
        let mut analyzer = analyzer();
        let err = analyzer.attach(AudioSource::microphone()).unwrap_err();
        assert!(matches!(err, VizError::SourceUnavailable(_)));
        assert!(!analyzer.is_attached());
    }
}
