//! Custom rules used by the `validator` derives on request payloads.

pub mod rules;

pub use validator::Validate;
