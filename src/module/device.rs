//! Provide Device Control.
//!
pub mod speaker;
