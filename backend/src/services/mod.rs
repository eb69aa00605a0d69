pub mod auth_gateway;
pub mod redis_session_store;
pub mod session_registry;
pub mod session_store;
pub mod token_issuer;
