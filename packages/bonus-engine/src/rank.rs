//! Rank evaluation: approved-client count → tier and star level.
//!
//! | approved clients | tier   | star level |
//! |------------------|--------|------------|
//! | 0–2              | rookie | 0          |
//! | 3–6              | 1-star | 1          |
//! | 7–12             | 2-star | 2          |
//! | 13–20            | 3-star | 3          |
//! | 21+              | 4-star | 4          |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::MAX_STAR_LEVEL;

// ─── Tier ─────────────────────────────────────────────────────────────────────

/// Canonical rank label. Always derived from a star level, never stored apart from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    #[serde(rename = "rookie")]
    Rookie,
    #[serde(rename = "1-star")]
    OneStar,
    #[serde(rename = "2-star")]
    TwoStar,
    #[serde(rename = "3-star")]
    ThreeStar,
    #[serde(rename = "4-star")]
    FourStar,
}

impl Tier {
    /// All tiers in ascending order.
    pub const ALL: &'static [Tier] = &[
        Tier::Rookie,
        Tier::OneStar,
        Tier::TwoStar,
        Tier::ThreeStar,
        Tier::FourStar,
    ];

    /// Map a star level to its tier. Levels above 4 clamp to 4-star.
    pub fn from_star_level(star_level: u8) -> Self {
        match star_level.min(MAX_STAR_LEVEL) {
            0 => Tier::Rookie,
            1 => Tier::OneStar,
            2 => Tier::TwoStar,
            3 => Tier::ThreeStar,
            _ => Tier::FourStar,
        }
    }

    pub fn star_level(&self) -> u8 {
        match self {
            Tier::Rookie    => 0,
            Tier::OneStar   => 1,
            Tier::TwoStar   => 2,
            Tier::ThreeStar => 3,
            Tier::FourStar  => 4,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Tier::Rookie    => "rookie",
            Tier::OneStar   => "1-star",
            Tier::TwoStar   => "2-star",
            Tier::ThreeStar => "3-star",
            Tier::FourStar  => "4-star",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ─── Rank ─────────────────────────────────────────────────────────────────────

/// A tier together with its numeric star level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rank {
    pub tier:       Tier,
    pub star_level: u8,
}

impl Rank {
    pub fn from_star_level(star_level: u8) -> Self {
        Tier::from_star_level(star_level).into()
    }
}

impl From<Tier> for Rank {
    fn from(tier: Tier) -> Self {
        Self { tier, star_level: tier.star_level() }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (level {})", self.tier, self.star_level)
    }
}

/// Rank earned by an agent with `approved_clients` approved clients.
///
/// Pure and total: every count maps to exactly one rank.
pub fn evaluate_rank(approved_clients: u64) -> Rank {
    let tier = match approved_clients {
        0..=2   => Tier::Rookie,
        3..=6   => Tier::OneStar,
        7..=12  => Tier::TwoStar,
        13..=20 => Tier::ThreeStar,
        _       => Tier::FourStar,
    };
    tier.into()
}
