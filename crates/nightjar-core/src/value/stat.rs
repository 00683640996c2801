//! Statistics-accumulating double payloads.
//!
//! A stat value keeps a history of samples and lazily recomputes
//! mean/median/min/max/stdev; the timeserie variant also fits a linear
//! trend (alpha + beta * t) over (sample, time) pairs.

use std::collections::VecDeque;

use crate::error::ValueError;
use crate::parse::Tokens;

use super::{feq, fmt_f64};

/// Double payload with sample statistics.
#[derive(Debug, Clone)]
pub struct DoubleStat {
    pub value: f64,
    pub n: i32,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub stdev: f64,
    pub samples: VecDeque<f64>,
}

impl Default for DoubleStat {
    fn default() -> Self {
        Self {
            value: f64::NAN,
            n: 0,
            median: f64::NAN,
            min: f64::NAN,
            max: f64::NAN,
            stdev: f64::NAN,
            samples: VecDeque::new(),
        }
    }
}

impl DoubleStat {
    pub fn add_sample(&mut self, sample: f64) {
        self.samples.push_back(sample);
    }

    /// Drop all samples and reset statistics to their unset state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Recompute statistics from the sample history. No-op when empty.
    /// Returns true when anything was recomputed.
    pub fn calculate(&mut self) -> bool {
        if self.samples.is_empty() {
            return false;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        self.n = sorted.len() as i32;
        self.min = sorted[0];
        self.max = sorted[sorted.len() - 1];
        let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
        self.value = mean;
        self.stdev = (sorted.iter().map(|s| (s - mean) * (s - mean)).sum::<f64>()
            / sorted.len() as f64)
            .sqrt();
        self.median = if sorted.len() % 2 == 1 {
            sorted[sorted.len() / 2]
        } else {
            (sorted[sorted.len() / 2 - 1] + sorted[sorted.len() / 2]) / 2.0
        };
        true
    }

    pub fn encode(&self) -> String {
        format!(
            "{} {} {} {} {} {}",
            fmt_f64(self.value),
            self.n,
            fmt_f64(self.median),
            fmt_f64(self.min),
            fmt_f64(self.max),
            fmt_f64(self.stdev)
        )
    }

    pub fn parse(toks: &mut Tokens<'_>) -> Result<Self, ValueError> {
        Ok(Self {
            value: toks.next_f64()?,
            n: toks.next_i32()?,
            median: toks.next_f64()?,
            min: toks.next_f64()?,
            max: toks.next_f64()?,
            stdev: toks.next_f64()?,
            samples: VecDeque::new(),
        })
    }

    pub fn copy_from(&mut self, other: &Self) {
        self.value = other.value;
        self.n = other.n;
        self.median = other.median;
        self.min = other.min;
        self.max = other.max;
        self.stdev = other.stdev;
        self.samples = other.samples.clone();
    }
}

/// Double payload with sample statistics and a linear trend over time.
#[derive(Debug, Clone)]
pub struct Timeserie {
    pub stat: DoubleStat,
    /// Trend intercept at the mean sample time.
    pub alpha: f64,
    /// Trend slope per unit of time.
    pub beta: f64,
    /// (sample, time) pairs.
    pub samples: VecDeque<(f64, f64)>,
}

impl Default for Timeserie {
    fn default() -> Self {
        Self {
            stat: DoubleStat::default(),
            alpha: f64::NAN,
            beta: f64::NAN,
            samples: VecDeque::new(),
        }
    }
}

impl Timeserie {
    pub fn add_sample(&mut self, sample: f64, time: f64) {
        self.samples.push_back((sample, time));
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Recompute statistics and the least-squares trend.
    pub fn calculate(&mut self) -> bool {
        if self.samples.is_empty() {
            return false;
        }
        self.stat.samples = self.samples.iter().map(|(s, _)| *s).collect();
        self.stat.calculate();

        let n = self.samples.len() as f64;
        let mean_v = self.stat.value;
        let mean_t = self.samples.iter().map(|(_, t)| *t).sum::<f64>() / n;
        let mut cov = 0.0;
        let mut var_t = 0.0;
        for (s, t) in &self.samples {
            cov += (t - mean_t) * (s - mean_v);
            var_t += (t - mean_t) * (t - mean_t);
        }
        if var_t > 0.0 {
            self.beta = cov / var_t;
            self.alpha = mean_v - self.beta * mean_t;
        } else {
            self.beta = f64::NAN;
            self.alpha = f64::NAN;
        }
        true
    }

    pub fn encode(&self) -> String {
        format!(
            "{} {} {}",
            self.stat.encode(),
            fmt_f64(self.alpha),
            fmt_f64(self.beta)
        )
    }

    pub fn parse(toks: &mut Tokens<'_>) -> Result<Self, ValueError> {
        let stat = DoubleStat::parse(toks)?;
        Ok(Self {
            stat,
            alpha: toks.next_f64()?,
            beta: toks.next_f64()?,
            samples: VecDeque::new(),
        })
    }

    pub fn copy_from(&mut self, other: &Self) {
        self.stat.copy_from(&other.stat);
        self.alpha = other.alpha;
        self.beta = other.beta;
        self.samples = other.samples.clone();
    }
}

/// Payload equality for stat values compares the primary value only,
/// matching scalar-double semantics.
pub fn stat_equal(a: &DoubleStat, b: &DoubleStat) -> bool {
    feq(a.value, b.value)
}
