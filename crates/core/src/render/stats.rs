use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Number of per-second fps samples kept.
pub const HISTORY_LEN: usize = 300;
/// Average frame rate below which a warning is logged.
pub const LOW_FPS: f32 = 30.0;

const WINDOW: Duration = Duration::from_secs(1);

/// Frame-rate bookkeeping for a render loop.
#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    window_start: Option<Instant>,
    window_frames: u32,
    last_frame: Option<Instant>,
    last_frame_time: Duration,
    history: VecDeque<f32>,
    total_frames: u64,
}

impl FrameStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a frame presented at `at`. Returns the measured rate whenever
    /// a one-second window closes.
    pub fn record(&mut self, at: Instant) -> Option<f32> {
        self.total_frames += 1;
        if let Some(last) = self.last_frame {
            self.last_frame_time = at.saturating_duration_since(last);
        }
        self.last_frame = Some(at);

        let Some(start) = self.window_start else {
            self.window_start = Some(at);
            return None;
        };
        self.window_frames += 1;
        let span = at.saturating_duration_since(start);
        if span < WINDOW {
            return None;
        }

        let fps = self.window_frames as f32 / span.as_secs_f32();
        self.window_start = Some(at);
        self.window_frames = 0;
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(fps);

        let average = self.average_fps();
        if average > 0.0 && average < LOW_FPS {
            tracing::warn!(average, "frame rate below {LOW_FPS} fps, consider a lower quality preset");
        }
        Some(fps)
    }

    /// Mean of the recorded per-second samples, zero before the first one.
    pub fn average_fps(&self) -> f32 {
        if self.history.is_empty() {
            return 0.0;
        }
        self.history.iter().sum::<f32>() / self.history.len() as f32
    }

    pub fn latest_fps(&self) -> Option<f32> {
        self.history.back().copied()
    }

    pub fn history(&self) -> impl Iterator<Item = f32> + '_ {
        self.history.iter().copied()
    }

    pub fn last_frame_time(&self) -> Duration {
        self.last_frame_time
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(stats: &mut FrameStats, start: Instant, fps: u32, frames: u32) -> Vec<f32> {
        let step = Duration::from_secs(1) / fps;
        (0..frames)
            .filter_map(|i| stats.record(start + step * i))
            .collect()
    }

    #[test]
    fn measures_once_per_second() {
        let mut stats = FrameStats::new();
        let samples = feed(&mut stats, Instant::now(), 60, 130);

        assert_eq!(samples.len(), 2);
        for fps in samples {
            assert!((fps - 60.0).abs() < 0.5, "{fps}");
        }
        assert_eq!(stats.total_frames(), 130);
        assert!((stats.last_frame_time().as_secs_f32() - 1.0 / 60.0).abs() < 1e-3);
    }

    #[test]
    fn history_is_bounded() {
        let mut stats = FrameStats::new();
        let start = Instant::now();
        for second in 0..=(HISTORY_LEN as u64 + 10) {
            stats.record(start + Duration::from_secs(second));
        }
        assert_eq!(stats.history().count(), HISTORY_LEN);
        assert!((stats.average_fps() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn empty_stats_average_zero() {
        let stats = FrameStats::new();
        assert_eq!(stats.average_fps(), 0.0);
        assert_eq!(stats.latest_fps(), None);
    }
}
