use std::time::{Duration, Instant};

/// Timing of one rendered frame.
#[derive(Debug, Copy, Clone)]
pub struct FrameTime {
    /// Seconds since the previous tick, clamped.
    pub dt: f32,

    /// Monotonic timestamp taken at the tick.
    pub now: Instant,

    /// Starts at zero for the first frame of a loop.
    pub frame_index: u64,
}

/// Produces `FrameTime` snapshots for one render loop.
///
/// Delta time is clamped so a loop that was stalled (debugger, long upload,
/// idle on-demand rendering) does not report a pathological `dt`.
#[derive(Debug, Clone)]
pub struct FrameClock {
    last: Option<Instant>,
    frame_index: u64,
    dt_min: Duration,
    dt_max: Duration,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::with_clamps(Duration::from_micros(100), Duration::from_millis(250))
    }

    pub fn with_clamps(dt_min: Duration, dt_max: Duration) -> Self {
        debug_assert!(dt_min <= dt_max);
        Self {
            last: None,
            frame_index: 0,
            dt_min,
            dt_max,
        }
    }

    /// Frames ticked so far.
    pub fn frames(&self) -> u64 {
        self.frame_index
    }

    /// Advances the clock. The first tick reports `dt_min`.
    pub fn tick(&mut self) -> FrameTime {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> FrameTime {
        let dt = self
            .last
            .map_or(self.dt_min, |last| now.saturating_duration_since(last))
            .clamp(self.dt_min, self.dt_max);
        self.last = Some(now);

        let time = FrameTime {
            dt: dt.as_secs_f32(),
            now,
            frame_index: self.frame_index,
        };
        self.frame_index = self.frame_index.wrapping_add(1);
        time
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Deadline tracker for loops that render at a fixed interval.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Duration,
    next: Instant,
}

impl FramePacer {
    /// The first frame is due immediately.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next
    }

    /// Time left until the next frame is due.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.next.saturating_duration_since(now)
    }

    /// Schedules the next frame one interval after `now`.
    ///
    /// Deadlines are not accumulated, so a slow frame does not cause a burst
    /// of catch-up frames.
    pub fn mark(&mut self, now: Instant) {
        self.next = now + self.interval;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tick_is_frame_zero() {
        let mut clock = FrameClock::new();
        let t = clock.tick();
        assert_eq!(t.frame_index, 0);
        assert_eq!(t.dt, Duration::from_micros(100).as_secs_f32());
        assert_eq!(clock.tick().frame_index, 1);
        assert_eq!(clock.frames(), 2);
    }

    #[test]
    fn dt_is_clamped() {
        let mut clock = FrameClock::with_clamps(Duration::from_millis(1), Duration::from_millis(10));
        let start = Instant::now();
        clock.tick_at(start);
        let stalled = clock.tick_at(start + Duration::from_secs(3));
        assert_eq!(stalled.dt, Duration::from_millis(10).as_secs_f32());
        let tight = clock.tick_at(start + Duration::from_secs(3));
        assert_eq!(tight.dt, Duration::from_millis(1).as_secs_f32());
    }

    #[test]
    fn pacer_schedules_from_the_last_frame() {
        let mut pacer = FramePacer::new(Duration::from_millis(20));
        let now = Instant::now() + Duration::from_millis(1);
        assert!(pacer.is_due(now));
        pacer.mark(now);
        assert!(!pacer.is_due(now + Duration::from_millis(5)));
        assert_eq!(
            pacer.remaining(now + Duration::from_millis(5)),
            Duration::from_millis(15)
        );
        assert!(pacer.is_due(now + Duration::from_millis(20)));
        assert_eq!(pacer.remaining(now + Duration::from_secs(1)), Duration::ZERO);
    }
}
