pub mod client;
pub mod jwt;
pub mod password;
