//! Learning-rate schedules.

use fusion_core::Real;
use serde::{Deserialize, Serialize};

/// Monotonically decreasing step-size schedule over a fixed iteration budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LrSchedule {
    /// Half-cosine decay from `lr` to `lr_min`.
    #[default]
    Cosine,
    /// Linear decay from `lr` to `lr_min`.
    Linear,
}

impl LrSchedule {
    /// Step size at iteration `iter` of `niter`.
    pub fn lr_at(&self, iter: usize, niter: usize, lr: Real, lr_min: Real) -> Real {
        if niter == 0 {
            return lr;
        }
        let t = (iter.min(niter) as Real) / niter as Real;
        match self {
            Self::Cosine => lr_min + (lr - lr_min) * 0.5 * (1.0 + (std::f64::consts::PI * t).cos()),
            Self::Linear => lr_min + (lr - lr_min) * (1.0 - t),
        }
    }
}

impl std::str::FromStr for LrSchedule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "linear" => Ok(Self::Linear),
            other => Err(format!("unknown schedule '{other}' (expected cosine or linear)")),
        }
    }
}
