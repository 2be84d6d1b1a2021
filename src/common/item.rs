use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Item held in one of a player's two item slots.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemCode {
    Banana = 1,
    TripleBanana = 2,
    GreenShell = 3,
    TripleGreenShell = 4,
    RedShell = 5,
    TripleRedShell = 6,
    BlueShell = 7,
    BobOmb = 8,
    Mushroom = 9,
    TripleMushroom = 10,
    GoldenMushroom = 11,
    BulletBill = 12,
    Blooper = 13,
    Lightning = 14,
    Star = 15,
    FireFlower = 16,
    Boomerang = 17,
    PiranhaPlant = 18,
    SuperHorn = 19,
    CrazyEight = 20,
    Coin = 21,
    Feather = 22,
    Boo = 23,
    #[default]
    None = 24,
}

impl ItemCode {
    pub const ALL: [ItemCode; 24] = [
        ItemCode::Banana,
        ItemCode::TripleBanana,
        ItemCode::GreenShell,
        ItemCode::TripleGreenShell,
        ItemCode::RedShell,
        ItemCode::TripleRedShell,
        ItemCode::BlueShell,
        ItemCode::BobOmb,
        ItemCode::Mushroom,
        ItemCode::TripleMushroom,
        ItemCode::GoldenMushroom,
        ItemCode::BulletBill,
        ItemCode::Blooper,
        ItemCode::Lightning,
        ItemCode::Star,
        ItemCode::FireFlower,
        ItemCode::Boomerang,
        ItemCode::PiranhaPlant,
        ItemCode::SuperHorn,
        ItemCode::CrazyEight,
        ItemCode::Coin,
        ItemCode::Feather,
        ItemCode::Boo,
        ItemCode::None,
    ];

    /// Canonical stored name, e.g. `TRIPLE_RED_SHELL`.
    pub fn name(&self) -> &'static str {
        match self {
            ItemCode::Banana => "BANANA",
            ItemCode::TripleBanana => "TRIPLE_BANANA",
            ItemCode::GreenShell => "GREEN_SHELL",
            ItemCode::TripleGreenShell => "TRIPLE_GREEN_SHELL",
            ItemCode::RedShell => "RED_SHELL",
            ItemCode::TripleRedShell => "TRIPLE_RED_SHELL",
            ItemCode::BlueShell => "BLUE_SHELL",
            ItemCode::BobOmb => "BOB_OMB",
            ItemCode::Mushroom => "MUSHROOM",
            ItemCode::TripleMushroom => "TRIPLE_MUSHROOM",
            ItemCode::GoldenMushroom => "GOLDEN_MUSHROOM",
            ItemCode::BulletBill => "BULLET_BILL",
            ItemCode::Blooper => "BLOOPER",
            ItemCode::Lightning => "LIGHTNING",
            ItemCode::Star => "STAR",
            ItemCode::FireFlower => "FIRE_FLOWER",
            ItemCode::Boomerang => "BOOMERANG",
            ItemCode::PiranhaPlant => "PIRANHA_PLANT",
            ItemCode::SuperHorn => "SUPER_HORN",
            ItemCode::CrazyEight => "CRAZY_EIGHT",
            ItemCode::Coin => "COIN",
            ItemCode::Feather => "FEATHER",
            ItemCode::Boo => "BOO",
            ItemCode::None => "NONE",
        }
    }
}

impl fmt::Display for ItemCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name().to_lowercase().replace('_', " "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownItem(pub String);

impl fmt::Display for UnknownItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown item '{}'", self.0)
    }
}

impl std::error::Error for UnknownItem {}

impl FromStr for ItemCode {
    type Err = UnknownItem;

    /// Accepts stored names as well as display names (`"triple red shell"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace([' ', '-'], "_");
        Self::ALL
            .iter()
            .copied()
            .find(|item| item.name() == normalized)
            .ok_or_else(|| UnknownItem(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stored_and_display_names() {
        assert_eq!("TRIPLE_RED_SHELL".parse(), Ok(ItemCode::TripleRedShell));
        assert_eq!("triple red shell".parse(), Ok(ItemCode::TripleRedShell));
        assert_eq!(" bob-omb ".parse(), Ok(ItemCode::BobOmb));
        assert!("spiny shell".parse::<ItemCode>().is_err());
    }

    #[test]
    fn serializes_as_stored_name() {
        let json = serde_json::to_string(&ItemCode::GoldenMushroom).unwrap();
        assert_eq!(json, "\"GOLDEN_MUSHROOM\"");
        assert_eq!(ItemCode::GoldenMushroom.to_string(), "golden mushroom");
    }
}
