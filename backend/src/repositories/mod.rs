//! Credential storage: the seam, and its PostgreSQL and in-process backends.

pub mod credential_store;
pub mod memory;
pub mod user;
