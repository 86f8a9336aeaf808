use tracing::warn;

/// Strictly increasing presentation timestamps for decoder input
#[derive(Debug, Clone)]
pub struct PtsGenerator {
    fps_hint: u32,
    last_us: i64,
}

impl Default for PtsGenerator {
    fn default() -> Self {
        Self {
            fps_hint: 30,
            last_us: 0,
        }
    }
}

impl PtsGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame rate used to synthesize timestamps; 0 means unknown (30)
    pub fn set_fps_hint(&mut self, fps: u32) {
        self.fps_hint = if fps > 0 { fps } else { 30 };
    }

    fn step_us(&self) -> i64 {
        1_000_000 / i64::from(self.fps_hint.max(1))
    }

    /// Map `input_us` onto the output sequence.
    ///
    /// Non-positive input is synthesized from the previous output; input that
    /// does not advance past the previous output is bumped by one frame step.
    /// If that step would overflow `i64`, the sequence restarts at one step,
    /// the same as after [`reset`](Self::reset).
    pub fn monotonic_us(&mut self, input_us: i64) -> i64 {
        let step = self.step_us();
        let out = if input_us > self.last_us && input_us > 0 {
            input_us
        } else if let Some(next) = self.last_us.checked_add(step) {
            next
        } else {
            warn!(last_us = self.last_us, "pts: timestamp range exhausted, restarting sequence");
            step
        };
        self.last_us = out;
        out
    }

    /// Start a new sequence; called whenever a new decoder session starts
    pub fn reset(&mut self) {
        self.last_us = 0;
    }
}
