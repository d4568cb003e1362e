use chrono::Utc;
use sqlx::SqlitePool;

use crate::database::models::*;

pub struct Queries;

impl Queries {
    pub async fn insert_token(pool: &SqlitePool, token: &NewToken) -> Result<Token, sqlx::Error> {
        let now = Utc::now();
        let id = sqlx::query(
            r#"
            INSERT INTO tokens (login, access_token, expires_in, refresh_token,
                                refresh_token_expires_in, token_type, created, updated)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&token.login)
        .bind(&token.access_token)
        .bind(token.expires_in)
        .bind(&token.refresh_token)
        .bind(token.refresh_token_expires_in)
        .bind(&token.token_type)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?
        .last_insert_rowid();

        Ok(Token {
            id,
            login: token.login.clone(),
            access_token: token.access_token.clone(),
            expires_in: token.expires_in,
            refresh_token: token.refresh_token.clone(),
            refresh_token_expires_in: token.refresh_token_expires_in,
            token_type: token.token_type.clone(),
            created: now,
            updated: now,
        })
    }

    pub async fn latest_token(pool: &SqlitePool, login: &str) -> Result<Option<Token>, sqlx::Error> {
        sqlx::query_as::<_, Token>(
            r#"
            SELECT id, login, access_token, expires_in, refresh_token,
                   refresh_token_expires_in, token_type, created, updated
            FROM tokens
            WHERE login = ?
            ORDER BY created DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(login)
        .fetch_optional(pool)
        .await
    }

    pub async fn tokens_for_login(pool: &SqlitePool, login: &str) -> Result<Vec<Token>, sqlx::Error> {
        sqlx::query_as::<_, Token>(
            r#"
            SELECT id, login, access_token, expires_in, refresh_token,
                   refresh_token_expires_in, token_type, created, updated
            FROM tokens
            WHERE login = ?
            ORDER BY created DESC, id DESC
            "#,
        )
        .bind(login)
        .fetch_all(pool)
        .await
    }

    pub async fn delete_tokens(pool: &SqlitePool, login: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tokens WHERE login = ?")
            .bind(login)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
