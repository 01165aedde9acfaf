//! Precision-safe numeric types.
//!
//! Prices use `rust_decimal` for exact arithmetic; quantities are whole
//! shares. KRX quotes move in price-dependent tick increments, so every
//! limit price must be snapped to the ladder before submission.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

/// Price in won with exact decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// KRX tick increment for this price level.
    ///
    /// Ladder: >=500,000 -> 1,000 / >=100,000 -> 500 / >=50,000 -> 100 /
    /// >=10,000 -> 50 / >=5,000 -> 10 / >=1,000 -> 5 / below -> 1 won.
    pub fn tick_size(&self) -> Decimal {
        let p = self.0;
        if p >= Decimal::from(500_000) {
            Decimal::from(1_000)
        } else if p >= Decimal::from(100_000) {
            Decimal::from(500)
        } else if p >= Decimal::from(50_000) {
            Decimal::from(100)
        } else if p >= Decimal::from(10_000) {
            Decimal::from(50)
        } else if p >= Decimal::from(5_000) {
            Decimal::from(10)
        } else if p >= Decimal::from(1_000) {
            Decimal::from(5)
        } else {
            Decimal::ONE
        }
    }

    /// Snap down to the nearest valid KRX tick.
    pub fn snap_to_tick(&self) -> Self {
        let tick = self.tick_size();
        Self((self.0 / tick).floor() * tick)
    }

    /// Percentage difference from another price.
    ///
    /// Returns None when `other` is zero.
    #[inline]
    pub fn pct_from(&self, other: Price) -> Option<Decimal> {
        if other.is_zero() {
            return None;
        }
        Some((self.0 - other.0) / other.0 * Decimal::from(100))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Price {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Price {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Price {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Div<Decimal> for Price {
    type Output = Self;

    fn div(self, rhs: Decimal) -> Self::Output {
        Self(self.0 / rhs)
    }
}

/// Order quantity in whole shares.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Qty(pub u64);

impl Qty {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub fn new(shares: u64) -> Self {
        Self(shares)
    }

    #[inline]
    pub fn inner(&self) -> u64 {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Notional value: shares * price.
    #[inline]
    pub fn notional(&self, price: Price) -> Decimal {
        Decimal::from(self.0) * price.0
    }
}

impl fmt::Display for Qty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Qty {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Qty {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_sub(rhs.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_tick_ladder() {
        assert_eq!(Price::new(dec!(850)).tick_size(), dec!(1));
        assert_eq!(Price::new(dec!(4300)).tick_size(), dec!(5));
        assert_eq!(Price::new(dec!(9990)).tick_size(), dec!(10));
        assert_eq!(Price::new(dec!(32000)).tick_size(), dec!(50));
        assert_eq!(Price::new(dec!(71500)).tick_size(), dec!(100));
        assert_eq!(Price::new(dec!(150000)).tick_size(), dec!(500));
        assert_eq!(Price::new(dec!(612000)).tick_size(), dec!(1000));
    }

    #[test]
    fn test_snap_to_tick() {
        let p = Price::new(dec!(71_534));
        assert_eq!(p.snap_to_tick().inner(), dec!(71_500));

        let p = Price::new(dec!(4_303));
        assert_eq!(p.snap_to_tick().inner(), dec!(4_300));

        // Already on tick: unchanged
        let p = Price::new(dec!(12_350));
        assert_eq!(p.snap_to_tick().inner(), dec!(12_350));
    }

    #[test]
    fn test_pct_from() {
        let entry = Price::new(dec!(10000));
        let now = Price::new(dec!(10200));
        assert_eq!(now.pct_from(entry).unwrap(), dec!(2));

        assert!(now.pct_from(Price::ZERO).is_none());
    }

    #[test]
    fn test_qty_notional() {
        let qty = Qty::new(30);
        let price = Price::new(dec!(71500));
        assert_eq!(qty.notional(price), dec!(2145000));
    }
}
