pub mod entity;
pub mod frame;
pub mod item;
pub mod race;

pub use entity::{EntityKey, PlayerSlot, SourceId};
pub use frame::Frame;
pub use item::ItemCode;
pub use race::RaceContext;
