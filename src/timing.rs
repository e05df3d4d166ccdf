//! Per-stage wall-clock logging.

use std::time::{Duration, Instant};

use crate::error::Stage;

/// Logs when a pipeline stage starts and how long it ran.
///
/// A timer dropped without [`StageTimer::finish`] belongs to a stage that
/// failed; that case is logged at debug level only, since the error itself
/// is reported by the caller.
pub struct StageTimer {
    stage: Stage,
    start: Instant,
    finished: bool,
}

impl StageTimer {
    pub fn start(stage: Stage, what: &str) -> Self {
        log::info!("[{}] {}...", stage, what);
        Self {
            stage,
            start: Instant::now(),
            finished: false,
        }
    }

    pub fn finish(mut self) -> Duration {
        self.finished = true;
        let elapsed = self.start.elapsed();
        log::info!("[{}] done in {}", self.stage, format_elapsed(elapsed));
        elapsed
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        if !self.finished {
            log::debug!(
                "[{}] abandoned after {}",
                self.stage,
                format_elapsed(self.start.elapsed())
            );
        }
    }
}

/// `12.3s` below a minute, `4m05s` above.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        let whole = elapsed.as_secs();
        format!("{}m{:02}s", whole / 60, whole % 60)
    }
}
