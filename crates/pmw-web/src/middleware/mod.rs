//! Request middleware

pub mod auth;

pub use auth::{
    extract_bearer_token, extract_ip, extract_upgrade_token, require_auth, source_ip, ClientIp,
};
