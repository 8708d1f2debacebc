//! Pubsink Testing Utilities.

/// In-memory publisher implementation for testing.
pub mod simplepublisher;
