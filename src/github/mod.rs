pub mod app_token;
pub mod checks;
pub mod client;
pub mod deployment;
pub mod types;
pub mod webhooks;

pub use app_token::{generate_app_jwt, GitHubApp, StaticToken, TokenSource};
pub use client::{Auth, GitHubClient, Mode};
