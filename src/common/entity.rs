use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one capture device or replayed stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub u32);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source{}", self.0)
    }
}

/// Split-screen slot of a player on one capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerSlot {
    P1,
    P2,
}

impl PlayerSlot {
    pub const ALL: [PlayerSlot; 2] = [PlayerSlot::P1, PlayerSlot::P2];

    pub fn number(&self) -> u32 {
        match self {
            PlayerSlot::P1 => 1,
            PlayerSlot::P2 => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerSlot::P1 => "p1",
            PlayerSlot::P2 => "p2",
        }
    }
}

impl fmt::Display for PlayerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partition key for all per-entity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub source: SourceId,
    pub slot: PlayerSlot,
}

impl EntityKey {
    pub fn new(source: SourceId, slot: PlayerSlot) -> Self {
        Self { source, slot }
    }

    /// Numeric player id used by stores: two ids per source, starting at 1.
    pub fn player_id(&self) -> u32 {
        self.source.0 * 2 + self.slot.number()
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_ids_do_not_collide_across_sources() {
        let ids: Vec<u32> = [0, 1]
            .into_iter()
            .flat_map(|s| PlayerSlot::ALL.map(|slot| EntityKey::new(SourceId(s), slot).player_id()))
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn entity_key_displays_source_and_slot() {
        let key = EntityKey::new(SourceId(3), PlayerSlot::P2);
        assert_eq!(key.to_string(), "source3/p2");
    }
}
