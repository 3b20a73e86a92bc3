//! Synthetic progress bands.
//!
//! The generation call gives the stream no fine-grained signal, so the
//! channel simulates one: fast early steps, slowing down as it approaches the
//! ceiling, then holding just below it until real completion arrives.

use std::time::Duration;

/// Synthetic progress stays strictly below this value.
pub const SYNTHETIC_CEILING: u8 = 90;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Band {
    pub phase: &'static str,
    pub message: &'static str,
    /// Exclusive upper bound of the progress values this band applies to.
    pub upper: u8,
    pub increment: u8,
    pub interval: Duration,
}

/// Next synthetic tick: wait `delay`, then show `progress`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticStep {
    pub phase: &'static str,
    pub message: &'static str,
    pub progress: u8,
    pub delay: Duration,
    pub eta_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SyntheticSchedule {
    bands: Vec<Band>,
}

impl Default for SyntheticSchedule {
    fn default() -> Self {
        Self::new(vec![
            Band {
                phase: "preparing",
                message: "Reviewing your goals",
                upper: 20,
                increment: 4,
                interval: Duration::from_secs(1),
            },
            Band {
                phase: "generating",
                message: "Building your plan",
                upper: 45,
                increment: 3,
                interval: Duration::from_secs(2),
            },
            Band {
                phase: "refining",
                message: "Balancing intensity and recovery",
                upper: 70,
                increment: 2,
                interval: Duration::from_secs(3),
            },
            Band {
                phase: "polishing",
                message: "Almost there",
                upper: SYNTHETIC_CEILING,
                increment: 1,
                interval: Duration::from_secs(5),
            },
        ])
    }
}

impl SyntheticSchedule {
    /// `bands` must be non-empty and ordered by `upper`.
    pub fn new(bands: Vec<Band>) -> Self {
        assert!(!bands.is_empty(), "synthetic schedule needs at least one band");
        Self { bands }
    }

    /// Same bands, every interval replaced by `interval`.
    pub fn with_uniform_interval(mut self, interval: Duration) -> Self {
        for band in &mut self.bands {
            band.interval = interval;
        }
        self
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn max_progress(&self) -> u8 {
        SYNTHETIC_CEILING - 1
    }

    fn band_for(&self, progress: u8) -> &Band {
        self.bands
            .iter()
            .find(|b| progress < b.upper)
            .unwrap_or_else(|| &self.bands[self.bands.len() - 1])
    }

    /// Next tick from `current`. At the ceiling this is a heartbeat at the
    /// same value, paced like the last band.
    pub fn step(&self, current: u8) -> SyntheticStep {
        let band = self.band_for(current);
        let progress = current
            .saturating_add(band.increment.max(1))
            .min(self.max_progress())
            .max(current.min(self.max_progress()));
        SyntheticStep {
            phase: band.phase,
            message: band.message,
            progress,
            delay: band.interval,
            eta_secs: self.eta_from(progress),
        }
    }

    /// Seconds the schedule needs to reach its ceiling from `current`.
    pub fn eta_from(&self, current: u8) -> Option<u64> {
        if current >= self.max_progress() {
            return None;
        }
        let mut at = current;
        let mut total = Duration::ZERO;
        while at < self.max_progress() {
            let band = self.band_for(at);
            total += band.interval;
            at = at.saturating_add(band.increment.max(1)).min(self.max_progress());
        }
        Some(total.as_secs())
    }
}
