use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};

use crate::{Result, VizError};

use super::{AudioNode, SourceKind};

/// Fixed-capacity history of the newest mono samples.
struct SampleRing {
    data: Vec<f32>,
    write: usize,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        Self {
            data: vec![0.0; capacity.max(1)],
            write: 0,
        }
    }

    fn push(&mut self, sample: f32) {
        self.data[self.write] = sample;
        self.write = (self.write + 1) % self.data.len();
    }

    fn copy_latest(&self, dest: &mut [f32]) {
        let len = self.data.len();
        let missing = dest.len().saturating_sub(len);
        dest[..missing].iter_mut().for_each(|slot| *slot = 0.0);
        let tail = &mut dest[missing..];
        let start = (self.write + len - tail.len()) % len;
        for (offset, slot) in tail.iter_mut().enumerate() {
            *slot = self.data[(start + offset) % len];
        }
    }
}

/// Live input stream from a capture device, mixed down to mono.
pub(crate) struct MicrophoneNode {
    stream: cpal::Stream,
    ring: Arc<Mutex<SampleRing>>,
}

impl MicrophoneNode {
    pub(crate) fn open(device_name: Option<&str>, window: usize) -> Result<Self> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(wanted) => host
                .input_devices()
                .map_err(|err| VizError::SourceUnavailable(err.to_string()))?
                .find(|device| device.name().map(|name| name == wanted).unwrap_or(false))
                .ok_or_else(|| {
                    VizError::SourceUnavailable(format!("no input device named `{wanted}`"))
                })?,
            None => host
                .default_input_device()
                .ok_or_else(|| VizError::SourceUnavailable("no default input device".into()))?,
        };

        let supported = device
            .default_input_config()
            .map_err(|err| VizError::SourceUnavailable(err.to_string()))?;
        let format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        tracing::info!(
            device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "opening microphone"
        );

        let ring = Arc::new(Mutex::new(SampleRing::new(window)));
        let stream = match format {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, ring.clone()),
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, ring.clone()),
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, ring.clone()),
            other => Err(VizError::SourceUnavailable(format!(
                "unsupported input sample format {other:?}"
            ))),
        }?;

        Ok(Self { stream, ring })
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    ring: Arc<Mutex<SampleRing>>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = usize::from(config.channels.max(1));
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // Never block the audio thread; a contended frame is skipped.
                let Ok(mut ring) = ring.try_lock() else {
                    return;
                };
                for frame in data.chunks(channels) {
                    let sum: f32 = frame.iter().map(|sample| sample.to_sample::<f32>()).sum();
                    ring.push(sum / frame.len() as f32);
                }
            },
            |err| tracing::warn!(%err, "microphone stream error"),
            None,
        )
        .map_err(|err| VizError::SourceUnavailable(err.to_string()))
}

impl AudioNode for MicrophoneNode {
    fn kind(&self) -> SourceKind {
        SourceKind::Microphone
    }

    fn start(&mut self) -> Result<()> {
        self.stream
            .play()
            .map_err(|err| VizError::SourceUnavailable(err.to_string()))
    }

    fn pause(&mut self) {
        if let Err(err) = self.stream.pause() {
            tracing::debug!(%err, "failed to pause microphone stream");
        }
    }

    fn resume(&mut self) -> Result<()> {
        self.start()
    }

    fn read_window(&self, dest: &mut [f32]) {
        match self.ring.lock() {
            Ok(ring) => ring.copy_latest(dest),
            Err(_) => dest.iter_mut().for_each(|slot| *slot = 0.0),
        }
    }
}
