//! Explicit units of measure with fixed conversion factors.
//!
//! All quantity arithmetic in the engine is enum-driven: mass and volume
//! amounts normalize into grams/milliliters before any multiplication, and
//! piece-counted units never participate in percent-of-batch math. Free-text
//! unit strings are accepted only at the boundary, through `FromStr`.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::StockError;

/// Unit of measure for stocked quantities.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Grams,
    Kilograms,
    Milliliters,
    Liters,
    Pieces,
}

impl Unit {
    /// The base unit amounts of this unit normalize into.
    pub fn base(self) -> Unit {
        match self {
            Unit::Grams | Unit::Kilograms => Unit::Grams,
            Unit::Milliliters | Unit::Liters => Unit::Milliliters,
            Unit::Pieces => Unit::Pieces,
        }
    }

    /// Multiplier from this unit into its base unit.
    pub fn base_factor(self) -> f64 {
        match self {
            Unit::Grams | Unit::Milliliters | Unit::Pieces => 1.0,
            Unit::Kilograms | Unit::Liters => 1000.0,
        }
    }

    /// Convert an amount expressed in this unit into the base unit.
    pub fn to_base(self, amount: f64) -> f64 {
        amount * self.base_factor()
    }

    /// Mass and volume units participate in percent-of-batch math.
    pub fn is_weighable(self) -> bool {
        !matches!(self, Unit::Pieces)
    }

    /// Piece-counted units are priced per piece, never normalized.
    pub fn is_count(self) -> bool {
        matches!(self, Unit::Pieces)
    }
}

impl core::fmt::Display for Unit {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let symbol = match self {
            Unit::Grams => "g",
            Unit::Kilograms => "kg",
            Unit::Milliliters => "ml",
            Unit::Liters => "l",
            Unit::Pieces => "pcs",
        };
        f.write_str(symbol)
    }
}

impl FromStr for Unit {
    type Err = StockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "g" | "gram" | "grams" => Ok(Unit::Grams),
            "kg" | "kilogram" | "kilograms" => Ok(Unit::Kilograms),
            "ml" | "milliliter" | "milliliters" => Ok(Unit::Milliliters),
            "l" | "liter" | "liters" | "litre" | "litres" => Ok(Unit::Liters),
            "pc" | "pcs" | "piece" | "pieces" => Ok(Unit::Pieces),
            other => Err(StockError::validation(format!("unknown unit: {other}"))),
        }
    }
}
