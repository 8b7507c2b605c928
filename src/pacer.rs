use std::thread;
use std::time::{Duration, Instant};

/// Tail of each frame wait that is spun rather than slept, to absorb the
/// scheduler's wake-up slop.
const SPIN_TAIL: Duration = Duration::from_micros(500);

/// Paces a worker thread to a target frame rate.
///
/// The limiter tracks a rolling deadline; [FrameLimiter::pace_to_next_frame]
/// sleeps out the bulk of the remaining span and spins the final stretch,
/// then opens a new frame. Measured timings for the previous frame and the
/// validated-frame counter feed the host overlay.
pub struct FrameLimiter {
    frame_span: Duration,
    next_deadline: Instant,
    frame_start: Instant,
    last_frame_millis: f32,
    valid_frames: u64,
}

impl Default for FrameLimiter {
    fn default() -> Self {
        Self::new(60.0)
    }
}

impl FrameLimiter {
    pub fn new(framerate: f32) -> Self {
        let now = Instant::now();
        let mut limiter = FrameLimiter {
            frame_span: Duration::from_secs(1),
            next_deadline: now,
            frame_start: now,
            last_frame_millis: 0.0,
            valid_frames: 0,
        };
        limiter.set_limiter(framerate);
        limiter
    }

    /// Retargets the limiter to a new frame rate. Values below 1 fps clamp.
    pub fn set_limiter(&mut self, framerate: f32) {
        let framerate = framerate.max(1.0);
        self.frame_span = Duration::from_secs_f64(1.0 / framerate as f64);
    }

    /// The target frame span in milliseconds.
    pub fn framespan_millis(&self) -> f32 {
        self.frame_span.as_secs_f32() * 1000.0
    }

    /// True when the current deadline has already passed, without blocking.
    pub fn frame_ready(&self) -> bool {
        Instant::now() >= self.next_deadline
    }

    /// Blocks until the next frame may begin, then opens it. Returns the
    /// index of the newly validated frame.
    pub fn pace_to_next_frame(&mut self) -> u64 {
        let deadline = self.next_deadline;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let remaining = deadline - now;
            if remaining > SPIN_TAIL {
                thread::sleep(remaining - SPIN_TAIL);
            } else {
                thread::yield_now();
            }
        }

        let now = Instant::now();
        self.last_frame_millis = (now - self.frame_start).as_secs_f32() * 1000.0;
        self.frame_start = now;
        // never let the deadline fall behind the present, or a stall would
        // be repaid with a burst of instant frames
        self.next_deadline = (deadline + self.frame_span).max(now);
        self.valid_frames += 1;
        self.valid_frames
    }

    /// Measured duration of the previous frame, in milliseconds.
    pub fn elapsed_millis_last(&self) -> f32 {
        self.last_frame_millis
    }

    /// Time spent inside the current frame so far, in microseconds.
    pub fn elapsed_micros_since(&self) -> f32 {
        self.frame_start.elapsed().as_secs_f32() * 1_000_000.0
    }

    /// The number of frames validated since construction.
    pub fn valid_frame_counter(&self) -> u64 {
        self.valid_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_advances_per_frame() {
        let mut pacer = FrameLimiter::new(1000.0);
        assert_eq!(pacer.valid_frame_counter(), 0);
        pacer.pace_to_next_frame();
        pacer.pace_to_next_frame();
        assert_eq!(pacer.valid_frame_counter(), 2);
    }

    #[test]
    fn test_pacing_does_not_run_ahead() {
        let mut pacer = FrameLimiter::new(200.0);
        let start = Instant::now();
        for _ in 0..4 {
            pacer.pace_to_next_frame();
        }
        // 4 frames at 5ms each; the first opens immediately
        assert!(start.elapsed() >= Duration::from_millis(12));
    }

    #[test]
    fn test_framespan_tracks_limiter() {
        let mut pacer = FrameLimiter::new(60.0);
        assert!((pacer.framespan_millis() - 16.666).abs() < 0.1);
        pacer.set_limiter(120.0);
        assert!((pacer.framespan_millis() - 8.333).abs() < 0.1);
    }
}
