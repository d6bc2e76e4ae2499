pub mod ability_fit;
pub mod backfill;
pub mod betting;
pub mod error;
pub mod export;
pub mod player_fit;
pub mod predict;
pub mod recency;
pub mod results;
pub mod scoreline;
pub mod store;
