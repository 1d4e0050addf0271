use std::{path::Path, sync::Arc, time::Duration};

use crate::{timeline::PlaybackClock, Result, VizError};

use super::{AudioNode, SourceKind};

/// Decoded mono audio held in memory.
#[derive(Clone)]
pub struct AudioBuffer {
    sample_rate: u32,
    samples: Arc<[f32]>,
}

impl AudioBuffer {
    pub fn new(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            samples: samples.into(),
        }
    }

    pub fn silent(sample_rate: u32, duration: Duration) -> Self {
        let len = (duration.as_secs_f64() * f64::from(sample_rate)) as usize;
        Self::new(sample_rate, vec![0.0; len])
    }

    /// Mixes interleaved multi-channel samples down to mono.
    pub fn from_interleaved(sample_rate: u32, channels: u16, data: &[f32]) -> Self {
        let channels = usize::from(channels.max(1));
        let mono = data
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();
        Self::new(sample_rate, mono)
    }

    /// Decodes a WAV file. Any failure to open or decode it is reported as
    /// [`VizError::SourceUnavailable`].
    pub fn from_wav(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let unavailable =
            |err: hound::Error| VizError::SourceUnavailable(format!("{}: {err}", path.display()));

        let reader = hound::WavReader::open(path).map_err(unavailable)?;
        let spec = reader.spec();
        let data = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(unavailable)?,
            hound::SampleFormat::Int => {
                let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|sample| sample.map(|value| value as f32 / scale))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(unavailable)?
            }
        };

        Ok(Self::from_interleaved(spec.sample_rate, spec.channels, &data))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

impl std::fmt::Debug for AudioBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioBuffer")
            .field("sample_rate", &self.sample_rate)
            .field("samples", &self.samples.len())
            .finish()
    }
}

/// Plays a decoded buffer once against the wall clock.
pub(crate) struct FileNode {
    buffer: AudioBuffer,
    clock: Option<PlaybackClock>,
}

impl FileNode {
    pub(crate) fn new(buffer: AudioBuffer) -> Self {
        Self {
            buffer,
            clock: None,
        }
    }

    fn cursor(&self) -> i64 {
        self.clock
            .as_ref()
            .map(|clock| (clock.elapsed().as_secs_f64() * f64::from(self.buffer.sample_rate)) as i64)
            .unwrap_or(0)
    }
}

impl AudioNode for FileNode {
    fn kind(&self) -> SourceKind {
        SourceKind::FileBuffer
    }

    fn start(&mut self) -> Result<()> {
        self.clock = Some(PlaybackClock::start());
        Ok(())
    }

    fn read_window(&self, dest: &mut [f32]) {
        let samples = self.buffer.samples();
        let first = self.cursor() - dest.len() as i64;
        for (offset, slot) in dest.iter_mut().enumerate() {
            let index = first + offset as i64;
            *slot = if index < 0 {
                0.0
            } else {
                samples.get(index as usize).copied().unwrap_or(0.0)
            };
        }
    }

    fn seek(&mut self, position: Duration) -> bool {
        match self.clock.as_mut() {
            Some(clock) => clock.seek(position),
            None => {
                let mut clock = PlaybackClock::start();
                clock.seek(position);
                self.clock = Some(clock);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixes_interleaved_channels() {
        let buffer = AudioBuffer::from_interleaved(10, 2, &[1.0, 0.0, 0.5, 0.5]);
        assert_eq!(buffer.samples(), &[0.5, 0.5]);
        assert_eq!(buffer.duration(), Duration::from_millis(200));
    }

    #[test]
    fn window_before_playback_is_silent() {
        let node = FileNode::new(AudioBuffer::new(100, vec![1.0; 100]));
        let mut window = [9.0; 8];
        node.read_window(&mut window);
        assert_eq!(window, [0.0; 8]);
    }

    #[test]
    fn window_tracks_seek_position() {
        let samples: Vec<f32> = (0..1000).map(|i| i as f32).collect();
        let mut node = FileNode::new(AudioBuffer::new(100, samples));
        node.start().unwrap();
        node.seek(Duration::from_secs(5));

        let mut window = [0.0; 4];
        node.read_window(&mut window);
        assert!(window[3] >= 496.0);
        assert_eq!(window[1] - window[0], 1.0);
    }

    #[test]
    fn playback_ends_in_silence() {
        let mut node = FileNode::new(AudioBuffer::new(100, vec![1.0; 10]));
        node.seek(Duration::from_secs(60));
        let mut window = [1.0; 4];
        node.read_window(&mut window);
        assert_eq!(window, [0.0; 4]);
    }

    #[test]
    fn decodes_wav_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..800 {
            writer.write_sample(i16::MAX / 2).unwrap();
        }
        writer.finalize().unwrap();

        let buffer = AudioBuffer::from_wav(&path).unwrap();
        assert_eq!(buffer.sample_rate(), 8000);
        assert_eq!(buffer.samples().len(), 800);
        assert!((buffer.samples()[0] - 0.5).abs() < 0.01);
    }

    #[test]
    fn missing_wav_is_unavailable() {
        let err = AudioBuffer::from_wav("/definitely/not/here.wav").unwrap_err();
        assert!(matches!(err, VizError::SourceUnavailable(_)));
    }
}
