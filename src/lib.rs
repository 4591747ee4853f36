// harmguard: harmful-content scoring, threat arbitration, and a moderating
// SMTP relay.
//
// This is the library root. Each module corresponds to a major subsystem:
// classifiers feed the fusion engine, the fusion engine feeds the threat
// level classifier and moderation gate, and the web API and SMTP relay are
// the two consumers of that decision.

pub mod config;
pub mod db;
pub mod email;
pub mod output;
pub mod relay;
pub mod scoring;
pub mod sentiment;
pub mod status;
pub mod toxicity;

#[cfg(feature = "web")]
pub mod web;
