//! The predictor's simulated position (digital twin of the training
//! environment's execution rules).
//!
//! The predictor believes its orders fill instantly at training-time
//! costs, with no rejections and no partial fills. Any change of action
//! closes the current position and opens the new one; that is the action
//! space the policy was trained against. The arithmetic below must stay
//! bit-for-bit aligned with the training environment — resist cleanups.

use serde::Deserialize;

use crate::models::Action;

use super::features::PositionFeatures;

/// Training-time execution cost parameters, frozen in the model bundle.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrainingCosts {
    #[serde(default = "default_spread_points")]
    pub spread_points: f64,
    #[serde(default = "default_slippage_points")]
    pub slippage_points: f64,
    #[serde(default = "default_commission")]
    pub commission_per_lot: f64,
    #[serde(default = "default_point")]
    pub point: f64,
    #[serde(default = "default_pip_value")]
    pub pip_value: f64,
    #[serde(default = "default_digits")]
    pub digits: u32,
    /// Lot per intensity: `[0, weak, moderate, strong]`.
    #[serde(default = "default_lot_sizes")]
    pub lot_sizes: Vec<f64>,
}

fn default_spread_points() -> f64 {
    7.0
}
fn default_slippage_points() -> f64 {
    2.0
}
fn default_commission() -> f64 {
    7.0
}
fn default_point() -> f64 {
    0.00001
}
fn default_pip_value() -> f64 {
    10.0
}
fn default_digits() -> u32 {
    5
}
fn default_lot_sizes() -> Vec<f64> {
    vec![0.0, 0.01, 0.03, 0.05]
}

impl Default for TrainingCosts {
    fn default() -> Self {
        Self {
            spread_points: default_spread_points(),
            slippage_points: default_slippage_points(),
            commission_per_lot: default_commission(),
            point: default_point(),
            pip_value: default_pip_value(),
            digits: default_digits(),
            lot_sizes: default_lot_sizes(),
        }
    }
}

impl TrainingCosts {
    /// Points per pip under the training price grid.
    #[must_use]
    pub const fn points_per_pip(&self) -> f64 {
        if self.digits == 5 || self.digits == 3 {
            10.0
        } else {
            1.0
        }
    }

    /// Lot for an intensity; unknown intensities map to 0.
    #[must_use]
    pub fn lot_for(&self, intensity: u8) -> f64 {
        self.lot_sizes
            .get(usize::from(intensity))
            .copied()
            .unwrap_or(0.0)
    }
}

/// Per-symbol virtual position, exclusively owned by the predictor task.
///
/// Invariants: `direction == 0` iff `intensity == 0`; `entry_price > 0`
/// iff `direction != 0`.
#[derive(Debug)]
pub struct VirtualPosition {
    costs: TrainingCosts,
    direction: i8,
    intensity: u8,
    entry_price: f64,
    current_pnl: f64,
    total_realized_pnl: f64,
}

impl VirtualPosition {
    /// Flat position with the given training costs.
    #[must_use]
    pub const fn new(costs: TrainingCosts) -> Self {
        Self {
            costs,
            direction: 0,
            intensity: 0,
            entry_price: 0.0,
            current_pnl: 0.0,
            total_realized_pnl: 0.0,
        }
    }

    /// Apply the policy action at the bar's close price.
    ///
    /// Same direction and intensity: hold, refresh floating PnL, return 0.
    /// Anything else: close if open (realizing PnL), then open the target
    /// if it is not flat. Returns the realized PnL of the close, if any.
    pub fn update(&mut self, action: Action, current_price: f64) -> f64 {
        let target_dir = action.direction().value();
        let target_intensity = action.intensity();

        if target_dir == self.direction && target_intensity == self.intensity {
            self.update_floating_pnl(current_price);
            return 0.0;
        }

        let mut realized = 0.0;
        if self.direction != 0 {
            realized = self.close(current_price);
            self.total_realized_pnl += realized;
        }

        if target_dir != 0 {
            self.open(target_dir, target_intensity, current_price);
            self.update_floating_pnl(current_price);
        }

        realized
    }

    /// Current direction (-1, 0, +1).
    #[must_use]
    pub const fn direction(&self) -> i8 {
        self.direction
    }

    /// Current intensity (0-3).
    #[must_use]
    pub const fn intensity(&self) -> u8 {
        self.intensity
    }

    /// Entry price of the open position, 0 when flat.
    #[must_use]
    pub const fn entry_price(&self) -> f64 {
        self.entry_price
    }

    /// Floating PnL (commission-adjusted at open).
    #[must_use]
    pub const fn current_pnl(&self) -> f64 {
        self.current_pnl
    }

    /// Sum of realized PnL across all virtual closes.
    #[must_use]
    pub const fn total_realized_pnl(&self) -> f64 {
        self.total_realized_pnl
    }

    /// True when a virtual position is open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.direction != 0
    }

    /// Lot from the training table for the current intensity.
    #[must_use]
    pub fn size(&self) -> f64 {
        self.costs.lot_for(self.intensity)
    }

    /// Snapshot consumed by the feature engine.
    #[must_use]
    pub fn features(&self) -> PositionFeatures {
        PositionFeatures {
            direction: self.direction,
            size: self.size(),
            pnl: self.current_pnl,
        }
    }

    fn open(&mut self, direction: i8, intensity: u8, price: f64) {
        let spread_cost = self.costs.spread_points * self.costs.point;
        let slippage = self.costs.slippage_points * self.costs.point;

        self.entry_price = if direction == 1 {
            price + spread_cost + slippage
        } else {
            price - spread_cost - slippage
        };
        self.direction = direction;
        self.intensity = intensity;
        self.current_pnl = 0.0;

        // Half the round-trip commission is debited at entry.
        let lot = self.costs.lot_for(intensity);
        self.current_pnl -= self.costs.commission_per_lot * lot / 2.0;
    }

    fn close(&mut self, price: f64) -> f64 {
        if self.direction == 0 {
            return 0.0;
        }

        let slippage = self.costs.slippage_points * self.costs.point;
        let exit_price = if self.direction == 1 {
            price - slippage
        } else {
            price + slippage
        };

        let price_diff = (exit_price - self.entry_price) * f64::from(self.direction);
        let pips = price_diff / self.costs.point / self.costs.points_per_pip();
        let lot = self.costs.lot_for(self.intensity);
        let mut pnl = pips * self.costs.pip_value * lot;

        // The other half of the commission is debited at exit.
        pnl -= self.costs.commission_per_lot * lot / 2.0;

        self.direction = 0;
        self.intensity = 0;
        self.entry_price = 0.0;
        self.current_pnl = 0.0;

        pnl
    }

    fn update_floating_pnl(&mut self, current_price: f64) {
        if self.direction == 0 {
            self.current_pnl = 0.0;
            return;
        }
        let price_diff = (current_price - self.entry_price) * f64::from(self.direction);
        let pips = price_diff / self.costs.point / self.costs.points_per_pip();
        self.current_pnl = pips * self.costs.pip_value * self.size();
    }
}
