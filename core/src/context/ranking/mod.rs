//! Ranking subsystem for context entries.

pub mod ranker;

pub use ranker::{ContextRanker, RankRequest, RankerConfig};
