use serde::{Deserialize, Serialize};
use std::fmt;

/// A non-negative rational number `num / den`. Thresholds and time adjustments are
/// expressed as ratios so that they are evaluated identically on every node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ratio {
    /// Numerator.
    pub num: u64,
    /// Denominator. Must be positive.
    pub den: u64,
}

impl Ratio {
    /// The ratio 1.
    pub const ONE: Self = Self { num: 1, den: 1 };

    /// Constructs a ratio, rejecting a zero denominator.
    pub fn new(num: u64, den: u64) -> anyhow::Result<Self> {
        let ratio = Self { num, den };
        ratio.validate()?;
        Ok(ratio)
    }

    /// Checks the denominator.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.den > 0, "ratio with a zero denominator");
        Ok(())
    }

    /// Whether `part >= self * total`.
    pub fn is_reached(&self, part: u64, total: u64) -> bool {
        u128::from(part) * u128::from(self.den) >= u128::from(total) * u128::from(self.num)
    }

    /// `floor(self * x)`, saturating.
    pub fn mul_floor(&self, x: u64) -> u64 {
        let v = u128::from(x) * u128::from(self.num) / u128::from(self.den.max(1));
        u64::try_from(v).unwrap_or(u64::MAX)
    }

    /// `floor(x / self)`, saturating. Division by zero saturates.
    pub fn div_floor(&self, x: u64) -> u64 {
        if self.num == 0 {
            return u64::MAX;
        }
        let v = u128::from(x) * u128::from(self.den) / u128::from(self.num);
        u64::try_from(v).unwrap_or(u64::MAX)
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}
