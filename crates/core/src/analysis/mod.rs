use std::{f32::consts::PI, fmt, ops::Range, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{Result, VizError};

pub const DEFAULT_FFT_SIZE: usize = 2048;
pub const MIN_FFT_SIZE: usize = 512;
pub const DEFAULT_SMOOTHING: f32 = 0.8;
pub const DEFAULT_MIN_DECIBELS: f32 = -100.0;
pub const DEFAULT_MAX_DECIBELS: f32 = -30.0;

/// Tunables for the spectral analysis window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Window length in samples. Must be a power of two of at least 512.
    pub fft_size: usize,
    /// Exponential smoothing constant in `[0, 1)` applied across snapshots.
    pub smoothing: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
    pub band_split: BandSplit,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            fft_size: DEFAULT_FFT_SIZE,
            smoothing: DEFAULT_SMOOTHING,
            min_decibels: DEFAULT_MIN_DECIBELS,
            max_decibels: DEFAULT_MAX_DECIBELS,
            band_split: BandSplit::Quarters,
        }
    }
}

impl AnalysisSettings {
    pub fn validate(&self) -> Result<()> {
        if self.fft_size < MIN_FFT_SIZE || !self.fft_size.is_power_of_two() {
            return Err(VizError::invalid(format!(
                "fft size must be a power of two >= {MIN_FFT_SIZE}, got {}",
                self.fft_size
            )));
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(VizError::invalid("smoothing must lie in [0, 1)"));
        }
        if self.min_decibels >= self.max_decibels {
            return Err(VizError::invalid(
                "min_decibels must be lower than max_decibels",
            ));
        }
        Ok(())
    }

    /// Number of magnitude bins in every [`FrequencySnapshot`].
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }
}

/// How a snapshot is carved into bass, mid and high ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandSplit {
    /// Bass and mid take one quarter each, high takes the upper half.
    #[default]
    Quarters,
    Thirds,
}

impl BandSplit {
    /// Returns the bass, mid and high ranges for a snapshot of `len` bins.
    /// The ranges are contiguous, disjoint and together cover `0..len`.
    pub fn ranges(self, len: usize) -> [Range<usize>; 3] {
        let (first, second) = match self {
            BandSplit::Quarters => (len / 4, len / 2),
            BandSplit::Thirds => (len / 3, len * 2 / 3),
        };
        [0..first, first..second, second..len]
    }
}

/// Coarse energy summary, each value the mean of its range in `[0, 255]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AudioBands {
    pub bass: f32,
    pub mid: f32,
    pub high: f32,
}

impl AudioBands {
    pub const SILENT: AudioBands = AudioBands {
        bass: 0.0,
        mid: 0.0,
        high: 0.0,
    };
}

/// Unsigned 8-bit magnitudes captured at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequencySnapshot {
    bins: Vec<u8>,
}

impl FrequencySnapshot {
    pub fn new(bins: Vec<u8>) -> Self {
        Self { bins }
    }

    pub fn bins(&self) -> &[u8] {
        &self.bins
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn bands(&self, split: BandSplit) -> AudioBands {
        let [bass, mid, high] = split.ranges(self.bins.len());
        AudioBands {
            bass: mean(&self.bins[bass]),
            mid: mean(&self.bins[mid]),
            high: mean(&self.bins[high]),
        }
    }
}

fn mean(values: &[u8]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let sum: u32 = values.iter().map(|value| u32::from(*value)).sum();
    sum as f32 / values.len() as f32
}

/// Windowed FFT that turns the latest block of samples into byte magnitudes.
///
/// Smoothing state carries over between calls, so consecutive snapshots of
/// the same source decay rather than jump.
pub struct AnalysisEngine {
    settings: AnalysisSettings,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    fft: FftResources,
}

impl AnalysisEngine {
    pub fn new(settings: AnalysisSettings) -> Result<Self> {
        settings.validate()?;
        let size = settings.fft_size;

        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(size);
        let fft = FftResources {
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        };

        Ok(Self {
            settings,
            window: (0..size).map(|index| blackman_value(index, size)).collect(),
            smoothed: vec![0.0; settings.bin_count()],
            fft,
        })
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    /// Clears the smoothing history while preserving configuration.
    pub fn reset(&mut self) {
        self.smoothed.iter_mut().for_each(|value| *value = 0.0);
    }

    /// Analyses one full window of samples. `samples` must hold exactly
    /// `fft_size` values, oldest first.
    pub fn analyse(&mut self, samples: &[f32]) -> Result<FrequencySnapshot> {
        let size = self.settings.fft_size;
        if samples.len() != size {
            return Err(VizError::invalid(format!(
                "analysis expects {size} samples, got {}",
                samples.len()
            )));
        }

        for ((slot, sample), weight) in self.fft.input.iter_mut().zip(samples).zip(&self.window) {
            *slot = sample * weight;
        }

        self.fft
            .plan
            .process_with_scratch(
                &mut self.fft.input,
                &mut self.fft.spectrum,
                &mut self.fft.scratch,
            )
            .map_err(|err| VizError::msg(format!("fft failed: {err}")))?;

        let tau = self.settings.smoothing;
        let min_db = self.settings.min_decibels;
        let range = self.settings.max_decibels - min_db;
        let norm = 1.0 / size as f32;

        let bins = self
            .smoothed
            .iter_mut()
            .zip(&self.fft.spectrum)
            .map(|(smoothed, bin)| {
                let magnitude = bin.norm() * norm;
                *smoothed = tau * *smoothed + (1.0 - tau) * magnitude;
                to_byte(*smoothed, min_db, range)
            })
            .collect();

        Ok(FrequencySnapshot::new(bins))
    }
}

/// Maps the newest half window of raw samples onto bytes, 128 being silence.
pub fn time_domain_bytes(samples: &[f32]) -> Vec<u8> {
    let start = samples.len() / 2;
    samples[start..]
        .iter()
        .map(|sample| ((sample + 1.0) * 128.0).clamp(0.0, 255.0) as u8)
        .collect()
}

fn to_byte(magnitude: f32, min_db: f32, range: f32) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = 255.0 * (db - min_db) / range;
    if scaled.is_finite() {
        scaled.clamp(0.0, 255.0) as u8
    } else {
        0
    }
}

fn blackman_value(index: usize, len: usize) -> f32 {
    let x = index as f32 / len as f32;
    0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
}

struct FftResources {
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for AnalysisEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisEngine")
            .field("settings", &self.settings)
            .field("bins", &self.smoothed.len())
            .finish()
    }
}
