pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod github;
pub mod installations;
pub mod oauth;
pub mod pr_info;
pub mod relay;
pub mod repos;
pub mod server;
pub mod webhooks;

pub use error::RelayError;
