use std::{
    collections::VecDeque,
    thread,
    time::{Duration, Instant},
};

/// Wall-clock position of a playing source, with support for seeking.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    origin: Instant,
    offset: Duration,
}

impl PlaybackClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
            offset: Duration::ZERO,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.offset + self.origin.elapsed()
    }

    /// Moves the playback position to `position` from now on.
    pub fn seek(&mut self, position: Duration) {
        self.origin = Instant::now();
        self.offset = position;
    }
}

/// Token identifying one pending "next display refresh" callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRequest(u64);

impl FrameRequest {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Source of display refresh callbacks.
///
/// The render loop asks for exactly one frame at a time and cancels its
/// outstanding request when it stops. Whoever drives the scheduler hands
/// fired requests back through `RenderLoop::on_frame`.
pub trait FrameScheduler {
    fn request_frame(&mut self) -> FrameRequest;
    fn cancel_frame(&mut self, request: FrameRequest);
}

/// Scheduler that can block the calling thread until its next frame is due.
pub trait PacedScheduler: FrameScheduler {
    /// Waits for the earliest pending request. Returns `None` when nothing
    /// is pending.
    fn wait_for_frame(&mut self) -> Option<(FrameRequest, Instant)>;
}

/// Scheduler driven by hand, used for deterministic and offline rendering.
///
/// Each fired frame is stamped `interval` after the previous one, starting
/// from the instant the scheduler was created.
#[derive(Debug)]
pub struct ManualScheduler {
    next_id: u64,
    pending: VecDeque<FrameRequest>,
    cancelled: u64,
    last_cancelled: Option<FrameRequest>,
    origin: Instant,
    interval: Duration,
    fired: u64,
}

impl ManualScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            next_id: 0,
            pending: VecDeque::new(),
            cancelled: 0,
            last_cancelled: None,
            origin: Instant::now(),
            interval,
            fired: 0,
        }
    }

    pub fn with_frame_rate(fps: u32) -> Self {
        Self::new(frame_interval(fps))
    }

    /// Pops the oldest pending request together with its simulated timestamp.
    pub fn fire(&mut self) -> Option<(FrameRequest, Instant)> {
        let request = self.pending.pop_front()?;
        self.fired += 1;
        let at = self.origin + self.interval * self.fired as u32;
        Some((request, at))
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Number of cancelled requests.
    pub fn cancelled(&self) -> u64 {
        self.cancelled
    }

    pub fn last_cancelled(&self) -> Option<FrameRequest> {
        self.last_cancelled
    }
}

impl FrameScheduler for ManualScheduler {
    fn request_frame(&mut self) -> FrameRequest {
        self.next_id += 1;
        let request = FrameRequest(self.next_id);
        self.pending.push_back(request);
        request
    }

    fn cancel_frame(&mut self, request: FrameRequest) {
        self.pending.retain(|pending| *pending != request);
        self.cancelled += 1;
        self.last_cancelled = Some(request);
    }
}

/// Real-time scheduler that paces frames at a fixed refresh rate.
#[derive(Debug)]
pub struct IntervalScheduler {
    interval: Duration,
    next_id: u64,
    next_deadline: Option<Instant>,
    pending: Option<FrameRequest>,
}

impl IntervalScheduler {
    pub fn new(fps: u32) -> Self {
        Self {
            interval: frame_interval(fps),
            next_id: 0,
            next_deadline: None,
            pending: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl FrameScheduler for IntervalScheduler {
    fn request_frame(&mut self) -> FrameRequest {
        self.next_id += 1;
        let request = FrameRequest(self.next_id);
        let now = Instant::now();
        let deadline = match self.next_deadline {
            // Late frames resynchronise instead of bursting to catch up.
            Some(deadline) if deadline > now => deadline,
            _ => now + self.interval,
        };
        self.next_deadline = Some(deadline);
        self.pending = Some(request);
        request
    }

    fn cancel_frame(&mut self, request: FrameRequest) {
        if self.pending == Some(request) {
            self.pending = None;
        }
    }
}

impl PacedScheduler for IntervalScheduler {
    fn wait_for_frame(&mut self) -> Option<(FrameRequest, Instant)> {
        let request = self.pending.take()?;
        let deadline = self.next_deadline.unwrap_or_else(Instant::now);
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        }
        self.next_deadline = Some(deadline + self.interval);
        Some((request, Instant::now()))
    }
}

/// Duration of one frame at `fps`, treating zero as one frame per second.
pub fn frame_interval(fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(fps.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_scheduler_fires_in_order_with_spaced_timestamps() {
        let mut scheduler = ManualScheduler::new(Duration::from_millis(10));
        let first = scheduler.request_frame();
        let second = scheduler.request_frame();

        let (a, at_a) = scheduler.fire().unwrap();
        let (b, at_b) = scheduler.fire().unwrap();
        assert_eq!((a, b), (first, second));
        assert_eq!(at_b - at_a, Duration::from_millis(10));
        assert!(scheduler.fire().is_none());
    }

    #[test]
    fn cancelled_requests_never_fire() {
        let mut scheduler = ManualScheduler::with_frame_rate(60);
        let request = scheduler.request_frame();
        scheduler.cancel_frame(request);

        assert_eq!(scheduler.pending(), 0);
        assert_eq!(scheduler.cancelled(), 1);
        assert_eq!(scheduler.last_cancelled(), Some(request));
        assert!(scheduler.fire().is_none());
    }

    #[test]
    fn interval_scheduler_paces_frames() {
        let mut scheduler = IntervalScheduler::new(100);
        let start = Instant::now();
        for _ in 0..3 {
            let request = scheduler.request_frame();
            let (fired, _) = scheduler.wait_for_frame().unwrap();
            assert_eq!(fired, request);
        }
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn interval_scheduler_forgets_cancelled_request() {
        let mut scheduler = IntervalScheduler::new(60);
        let request = scheduler.request_frame();
        scheduler.cancel_frame(request);
        assert!(scheduler.wait_for_frame().is_none());
    }

    #[test]
    fn playback_clock_seeks() {
        let mut clock = PlaybackClock::start();
        clock.seek(Duration::from_secs(5));
        assert!(clock.elapsed() >= Duration::from_secs(5));
    }
}
