mod common;

use chrono::{Duration, Utc};
use pr_relay::config::AppConfig;
use pr_relay::database::Database;
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

#[tokio::test]
async fn test_tokens_survive_reconnect() {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}", dir.path().join("relay.db").display());

    {
        let database = Database::new(&url).await.unwrap();
        database.run_migrations().await.unwrap();
        common::store_token(&database, "mithro").await;
        database.pool().close().await;
    }

    let database = Database::new(&url).await.unwrap();
    database.run_migrations().await.unwrap();
    let token = database.latest_token("mithro").await.unwrap().unwrap();
    assert_eq!(token.access_token, "ghu_stored");
    assert_eq!(token.expires_at(), Some(token.created + Duration::seconds(28800)));
    assert!(!token.is_expired(Utc::now()));
    assert!(token.is_refresh_expired(token.created + Duration::seconds(15897600)));
}

#[tokio::test]
async fn test_revoke_removes_only_that_login() {
    let database = Database::new_in_memory().await.unwrap();
    common::store_token(&database, "mithro").await;
    common::store_token(&database, "mithro").await;
    common::store_token(&database, "octocat").await;

    assert_eq!(database.delete_tokens("mithro").await.unwrap(), 2);
    assert!(database.latest_token("mithro").await.unwrap().is_none());
    assert!(database.latest_token("octocat").await.unwrap().is_some());
}

#[test]
fn test_app_credentials_read_key_file() {
    let mut key = NamedTempFile::new().unwrap();
    write!(key, "{}", include_str!("fixtures/app-private-key.pem")).unwrap();
    let path = key.path().to_str().unwrap().to_string();

    let config = AppConfig::from_pairs([
        ("github_app_id", "4242"),
        ("github_private_key_path", path.as_str()),
    ])
    .unwrap();
    let (app_id, pem) = config.github_app_credentials().unwrap().unwrap();
    assert_eq!(app_id, 4242);
    assert!(pem.starts_with("-----BEGIN"));

    let missing = AppConfig::from_pairs([
        ("github_app_id", "4242"),
        ("github_private_key_path", "/nonexistent/key.pem"),
    ])
    .unwrap();
    assert!(missing.github_app_credentials().is_err());
}
