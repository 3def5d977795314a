//! Feedback
//!
//! Turns execution results into follow-up actions for the conversation
//! loop. Nothing here re-runs a tool.

mod manager;

pub use manager::{FeedbackManager, FollowUpAction, StatusLevel};
