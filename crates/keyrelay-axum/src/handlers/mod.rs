//! Admin API handlers. Thin: extract, delegate, wrap in the envelope.

pub mod channel_types;
pub mod scripts;
