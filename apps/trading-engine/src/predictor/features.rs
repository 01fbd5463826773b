//! Feature computation over a windowed OHLCV series.
//!
//! Output must match the training environment element-wise within 1e-6.
//! Window semantics mirror rolling computations with a full minimum
//! period: a window that cannot be filled yields 0 for that feature, and
//! the first return of a series participates in counting windows as
//! neither up nor down. Do not "fix" or simplify any of the formulas
//! here without regenerating the reference fixtures.

use crate::models::Bar;

/// Columnar snapshot of a bar window, oldest first.
#[derive(Debug, Clone, Default)]
pub struct BarWindow {
    pub time: Vec<i64>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
}

impl BarWindow {
    /// Number of bars in the window.
    #[must_use]
    pub fn len(&self) -> usize {
        self.time.len()
    }

    /// True when the window holds no bars.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Append one bar's fields.
    pub fn push(&mut self, bar: &Bar) {
        self.time.push(bar.time);
        self.open.push(bar.open);
        self.high.push(bar.high);
        self.low.push(bar.low);
        self.close.push(bar.close);
        self.volume.push(bar.volume);
    }
}

/// Virtual position fields consumed as policy features.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionFeatures {
    /// -1, 0 or +1.
    pub direction: i8,
    /// Lot size from the training lot table, indexed by intensity.
    pub size: f64,
    /// Floating PnL in account currency.
    pub pnl: f64,
}

/// Indicator periods, frozen at training time and carried in the model
/// bundle metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureParams {
    pub momentum_period: usize,
    pub consistency_period: usize,
    pub hmm_range_period: usize,
    pub roc_period: usize,
    pub atr_period: usize,
    pub ema_period: usize,
    pub range_period: usize,
    pub volume_ma_period: usize,
    pub n_states: usize,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            momentum_period: 12,
            consistency_period: 12,
            hmm_range_period: 20,
            roc_period: 10,
            atr_period: 14,
            ema_period: 200,
            range_period: 20,
            volume_ma_period: 20,
            n_states: 5,
        }
    }
}

impl FeatureParams {
    /// Length of the policy feature vector: 6 market features, one-hot
    /// regime states, 3 position features.
    #[must_use]
    pub const fn policy_len(&self) -> usize {
        6 + self.n_states + 3
    }

    /// Regime features for the last bar of the window:
    /// `[momentum, consistency, range_position]`.
    #[must_use]
    pub fn hmm_features(&self, w: &BarWindow) -> [f64; 3] {
        [
            sanitize(self.momentum(w)),
            sanitize(self.consistency(w)),
            sanitize(range_position(w, self.hmm_range_period)),
        ]
    }

    /// Policy features for the last bar of the window.
    #[must_use]
    pub fn policy_features(
        &self,
        w: &BarWindow,
        hmm_state: usize,
        position: PositionFeatures,
    ) -> Vec<f64> {
        let mut features = Vec::with_capacity(self.policy_len());

        features.push(sanitize(self.roc(w)));
        features.push(sanitize(self.atr(w)));
        features.push(sanitize(self.trend(w)));
        features.push(sanitize(range_position(w, self.range_period)));
        features.push(sanitize(self.relative_volume(w)));
        features.push(sanitize(session_phase(w)));

        for state in 0..self.n_states {
            features.push(if state == hmm_state { 1.0 } else { 0.0 });
        }

        features.push(f64::from(position.direction));
        features.push(position.size * 10.0);
        features.push((position.pnl / 100.0).tanh());

        features
    }

    /// Rolling sum of percent returns over `momentum_period`, scaled by
    /// 100 and clipped to [-5, 5].
    fn momentum(&self, w: &BarWindow) -> f64 {
        let n = w.len();
        // The return series starts at the second bar, so the last full
        // window needs momentum_period + 1 closes.
        if n < self.momentum_period + 1 {
            return f64::NAN;
        }
        let mut sum = 0.0;
        for i in (n - self.momentum_period)..n {
            sum += w.close[i] / w.close[i - 1] - 1.0;
        }
        (sum * 100.0).clamp(-5.0, 5.0)
    }

    /// Directional consistency over `consistency_period` returns:
    /// `(max(up, down) / period * 2 - 1) * sign(up - down)`.
    fn consistency(&self, w: &BarWindow) -> f64 {
        let n = w.len();
        let period = self.consistency_period;
        if n < period {
            return f64::NAN;
        }
        let mut up = 0usize;
        let mut down = 0usize;
        for i in (n - period)..n {
            if i == 0 {
                // First bar has no return; counts as neither direction.
                continue;
            }
            let r = w.close[i] / w.close[i - 1] - 1.0;
            if r > 0.0 {
                up += 1;
            } else if r < 0.0 {
                down += 1;
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let magnitude = up.max(down) as f64 / period as f64 * 2.0 - 1.0;
        let sign = match up.cmp(&down) {
            std::cmp::Ordering::Greater => 1.0,
            std::cmp::Ordering::Less => -1.0,
            std::cmp::Ordering::Equal => 0.0,
        };
        magnitude * sign
    }

    /// Rate of change versus `roc_period` bars ago, squashed.
    fn roc(&self, w: &BarWindow) -> f64 {
        let n = w.len();
        if n < self.roc_period + 1 {
            return f64::NAN;
        }
        let last = w.close[n - 1];
        let past = w.close[n - 1 - self.roc_period];
        ((last - past) / past * 20.0).tanh()
    }

    /// Normalized average true range, squashed.
    fn atr(&self, w: &BarWindow) -> f64 {
        let n = w.len();
        if n < self.atr_period {
            return f64::NAN;
        }
        let mut sum = 0.0;
        for i in (n - self.atr_period)..n {
            sum += true_range(w, i);
        }
        #[allow(clippy::cast_precision_loss)]
        let mean = sum / self.atr_period as f64;
        (mean / w.close[n - 1] * 50.0).tanh()
    }

    /// Close versus an exponential moving average (span-form smoothing
    /// seeded with the first close), squashed.
    fn trend(&self, w: &BarWindow) -> f64 {
        let n = w.len();
        if n == 0 {
            return f64::NAN;
        }
        #[allow(clippy::cast_precision_loss)]
        let alpha = 2.0 / (self.ema_period as f64 + 1.0);
        let mut ema = w.close[0];
        for i in 1..n {
            ema = alpha * w.close[i] + (1.0 - alpha) * ema;
        }
        let last = w.close[n - 1];
        ((last - ema) / ema * 20.0).tanh()
    }

    /// Volume relative to its rolling mean, squashed. A zero mean is
    /// substituted with 1 before dividing.
    fn relative_volume(&self, w: &BarWindow) -> f64 {
        let n = w.len();
        let period = self.volume_ma_period;
        if n < period {
            return f64::NAN;
        }
        let sum: f64 = w.volume[(n - period)..n].iter().sum();
        #[allow(clippy::cast_precision_loss)]
        let mut mean = sum / period as f64;
        if mean == 0.0 {
            mean = 1.0;
        }
        ((w.volume[n - 1] / mean - 1.0) * 2.0).tanh()
    }
}

/// Position of the last close inside the high/low range of the window,
/// rescaled to [-1, 1]. A degenerate range yields 0.
fn range_position(w: &BarWindow, period: usize) -> f64 {
    let n = w.len();
    if n < period {
        return f64::NAN;
    }
    let highest = w.high[(n - period)..n]
        .iter()
        .fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let lowest = w.low[(n - period)..n]
        .iter()
        .fold(f64::INFINITY, |a, &b| a.min(b));
    let range = highest - lowest;
    if range == 0.0 {
        return f64::NAN;
    }
    (w.close[n - 1] - lowest) / range * 2.0 - 1.0
}

/// Hour-of-day phase of the last bar: `sin(2*pi*hour/24)`.
fn session_phase(w: &BarWindow) -> f64 {
    let n = w.len();
    if n == 0 {
        return f64::NAN;
    }
    let hour = w.time[n - 1].rem_euclid(86_400) / 3_600;
    #[allow(clippy::cast_precision_loss)]
    let hour = hour as f64;
    (2.0 * std::f64::consts::PI * hour / 24.0).sin()
}

/// True range at index `i`; the first bar falls back to high - low.
fn true_range(w: &BarWindow, i: usize) -> f64 {
    let hl = w.high[i] - w.low[i];
    if i == 0 {
        return hl;
    }
    let prev_close = w.close[i - 1];
    hl.max((w.high[i] - prev_close).abs())
        .max((w.low[i] - prev_close).abs())
}

/// Map NaN (unfilled window, degenerate range) to 0.
fn sanitize(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value
    }
}
