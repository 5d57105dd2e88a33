//! Human-readable text for score changes and stored scores.

pub mod format;
