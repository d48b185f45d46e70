use std::time::{Duration, Instant};

/// Presentation timestamp attached to a frame as it travels through the graph.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FrameTime {
    /// Presentation time relative to the start of the stream.
    pub pts: Duration,

    /// Monotonic frame counter of the producing source.
    pub frame_index: u64,
}

impl FrameTime {
    #[inline]
    pub const fn new(pts: Duration, frame_index: u64) -> Self {
        Self { pts, frame_index }
    }
}

/// Clock producing monotonic `FrameTime` stamps for a single source.
///
/// Consecutive stamps are at least `min_step` apart so that downstream consumers
/// never observe two frames with the same presentation time.
#[derive(Debug, Clone)]
pub struct FrameClock {
    start: Instant,
    last: Option<Duration>,
    frame_index: u64,
    min_step: Duration,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::with_min_step(Duration::from_micros(100))
    }

    pub fn with_min_step(min_step: Duration) -> Self {
        Self {
            start: Instant::now(),
            last: None,
            frame_index: 0,
            min_step,
        }
    }

    /// Restarts the stream at pts 0 and frame index 0.
    pub fn reset(&mut self) {
        self.start = Instant::now();
        self.last = None;
        self.frame_index = 0;
    }

    /// Advances the clock and returns the stamp for the next frame.
    pub fn tick(&mut self) -> FrameTime {
        let mut pts = Instant::now().saturating_duration_since(self.start);

        if let Some(last) = self.last {
            if pts < last + self.min_step {
                pts = last + self.min_step;
            }
        }
        self.last = Some(pts);

        let ft = FrameTime::new(pts, self.frame_index);
        self.frame_index = self.frame_index.wrapping_add(1);
        ft
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_are_strictly_increasing() {
        let mut clock = FrameClock::with_min_step(Duration::from_millis(1));
        let a = clock.tick();
        let b = clock.tick();
        let c = clock.tick();
        assert!(b.pts >= a.pts + Duration::from_millis(1));
        assert!(c.pts > b.pts);
        assert_eq!((a.frame_index, b.frame_index, c.frame_index), (0, 1, 2));
    }

    #[test]
    fn reset_restarts_index() {
        let mut clock = FrameClock::new();
        clock.tick();
        clock.tick();
        clock.reset();
        assert_eq!(clock.tick().frame_index, 0);
    }
}
