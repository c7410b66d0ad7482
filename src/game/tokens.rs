//! Fixed-point token amounts
//!
//! Balances are held in micro-tokens so pellet distribution, kill transfers
//! and settlement never accumulate floating-point drift.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Micro-tokens per whole token
pub const MICROS_PER_TOKEN: u64 = 1_000_000;

#[derive(Debug, Error, PartialEq)]
pub enum TokenError {
    #[error("token amount must be finite and non-negative, got {0}")]
    Invalid(f64),
    #[error("token amount {0} overflows")]
    Overflow(f64),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tokens(u64);

impl Tokens {
    pub const ZERO: Tokens = Tokens(0);

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub const fn micros(self) -> u64 {
        self.0
    }

    /// Convert a whole-token amount, rounding to the nearest micro-token
    pub fn try_from_f64(amount: f64) -> Result<Self, TokenError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(TokenError::Invalid(amount));
        }
        let micros = (amount * MICROS_PER_TOKEN as f64).round();
        if micros > u64::MAX as f64 {
            return Err(TokenError::Overflow(amount));
        }
        Ok(Self(micros as u64))
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / MICROS_PER_TOKEN as f64
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Add for Tokens {
    type Output = Tokens;

    fn add(self, other: Tokens) -> Tokens {
        Tokens(self.0.saturating_add(other.0))
    }
}

impl AddAssign for Tokens {
    fn add_assign(&mut self, other: Tokens) {
        self.0 = self.0.saturating_add(other.0);
    }
}

impl Sum for Tokens {
    fn sum<I: Iterator<Item = Tokens>>(iter: I) -> Tokens {
        iter.fold(Tokens::ZERO, Add::add)
    }
}

impl fmt::Display for Tokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:06}",
            self.0 / MICROS_PER_TOKEN,
            self.0 % MICROS_PER_TOKEN
        )
    }
}
