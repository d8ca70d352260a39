use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoyaltyTier {
    #[default]
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl LoyaltyTier {
    /// Unrecognized tier names fall back to bronze, which carries no discount.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "silver" => Self::Silver,
            "gold" => Self::Gold,
            "platinum" => Self::Platinum,
            _ => Self::Bronze,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
            Self::Platinum => "platinum",
        }
    }

    pub fn discount_rate(&self) -> Decimal {
        match self {
            Self::Bronze => Decimal::ZERO,
            Self::Silver => Decimal::new(5, 2),
            Self::Gold => Decimal::new(10, 2),
            Self::Platinum => Decimal::new(15, 2),
        }
    }
}

impl fmt::Display for LoyaltyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub name: String,
    pub loyalty_tier: LoyaltyTier,
}

impl UserProfile {
    pub const GUEST_NAME: &'static str = "Guest";

    pub fn guest(user_id: impl Into<String>) -> Self {
        Self {
            user_id: UserId(user_id.into()),
            name: Self::GUEST_NAME.to_string(),
            loyalty_tier: LoyaltyTier::Bronze,
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{LoyaltyTier, UserProfile};

    #[test]
    fn tier_parsing_is_case_insensitive_and_lenient() {
        assert_eq!(LoyaltyTier::parse_lenient(" GOLD "), LoyaltyTier::Gold);
        assert_eq!(LoyaltyTier::parse_lenient("diamond"), LoyaltyTier::Bronze);
        assert_eq!(LoyaltyTier::Platinum.discount_rate(), Decimal::new(15, 2));
    }

    #[test]
    fn guest_profile_is_bronze() {
        let guest = UserProfile::guest("anon");
        assert_eq!(guest.name, "Guest");
        assert_eq!(guest.loyalty_tier, LoyaltyTier::Bronze);
    }
}
