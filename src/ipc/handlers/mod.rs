pub mod attendance;
pub mod core;
pub mod edits;
pub mod leaderboard;
pub mod roster;
pub mod stats;
