pub mod confirmations;
pub mod roster;
