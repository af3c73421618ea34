//! Progress estimation across the three remote job phases.

use std::sync::{Arc, Mutex};

use crate::converter::ProgressReporter;

/// A remote job phase and its share of the overall progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Upload,
    Convert,
    Download,
}

impl Phase {
    const ALL: [Phase; 3] = [Phase::Upload, Phase::Convert, Phase::Download];

    /// Percentage points this phase contributes.
    pub fn weight(self) -> f64 {
        match self {
            Phase::Upload => 25.0,
            Phase::Convert => 50.0,
            Phase::Download => 25.0,
        }
    }

    /// Sum of the weights of all earlier phases.
    pub fn offset(self) -> f64 {
        Self::ALL
            .iter()
            .take_while(|p| **p != self)
            .map(|p| p.weight())
            .sum()
    }
}

/// Overall progress for `fraction` (0..=1) of `phase`.
pub fn estimate(phase: Phase, fraction: f64) -> f64 {
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    fraction * phase.weight() + phase.offset()
}

/// Forwards phase progress to a reporter, never moving backwards.
///
/// Clones share the high-water mark.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    reporter: ProgressReporter,
    last: Arc<Mutex<f64>>,
}

impl PhaseTracker {
    pub fn new(reporter: ProgressReporter) -> Self {
        Self {
            reporter,
            last: Arc::new(Mutex::new(0.0)),
        }
    }

    /// Reports `loaded / total` of `phase`. Unknown totals are ignored.
    pub fn ratio(&self, phase: Phase, loaded: u64, total: u64) {
        if total == 0 {
            return;
        }
        self.fraction(phase, loaded as f64 / total as f64);
    }

    pub fn fraction(&self, phase: Phase, fraction: f64) {
        let value = estimate(phase, fraction);
        let advanced = match self.last.lock() {
            Ok(mut last) if value > *last => {
                *last = value;
                true
            }
            _ => false,
        };
        if advanced {
            self.reporter.report(value);
        }
    }

    pub fn last(&self) -> f64 {
        self.last.lock().map(|l| *l).unwrap_or(0.0)
    }
}
