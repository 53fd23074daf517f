use tracing::info;

/// Running estimate of per-camera processing time, consumed by the deferred
/// queue's admission check. The estimate is replaced wholesale every 50
/// samples rather than updated per tick, so single slow ticks don't swing it.
#[derive(Debug)]
pub struct TimeTracker {
    total_secs: f64,
    samples: u32,
    time_per_sample: f64,
}

/// Big enough to be stable, small enough to adapt to current conditions.
const RESET_SAMPLES: u32 = 50;

impl TimeTracker {
    pub fn new() -> Self {
        Self {
            total_secs: 0.0,
            samples: 0,
            // starting estimate of 3 seconds per camera
            time_per_sample: 3.0,
        }
    }

    pub fn time_per_sample(&self) -> f64 {
        self.time_per_sample
    }

    pub fn record(&mut self, processing_secs: f64) {
        self.total_secs += processing_secs;
        self.samples += 1;
        if self.samples >= RESET_SAMPLES {
            self.time_per_sample = self.total_secs / self.samples as f64;
            self.total_secs = 0.0;
            self.samples = 0;
            info!("new time per sample {:.2}s", self.time_per_sample);
        }
    }
}

impl Default for TimeTracker {
    fn default() -> Self {
        Self::new()
    }
}
