// Scoring: the harm category model, signal fusion, and the threat level /
// moderation gate that every entry point shares.

pub mod category;
pub mod fusion;
pub mod threat;
