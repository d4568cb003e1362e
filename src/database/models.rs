use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An OAuth user-to-server token as stored in the `tokens` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Token {
    pub id: i64,
    pub login: String,
    pub access_token: String,
    pub expires_in: i64,
    pub refresh_token: String,
    pub refresh_token_expires_in: i64,
    pub token_type: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// Fields of a token returned by the OAuth endpoint, before it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewToken {
    pub login: String,
    pub access_token: String,
    pub expires_in: i64,
    pub refresh_token: String,
    pub refresh_token_expires_in: i64,
    pub token_type: String,
}

fn offset(from: DateTime<Utc>, seconds: i64) -> Option<DateTime<Utc>> {
    Duration::try_seconds(seconds).and_then(|delta| from.checked_add_signed(delta))
}

fn show(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(|| "never".to_string(), |at| at.to_string())
}

impl Token {
    /// `None` when the lifetime runs past the calendar chrono can represent.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        offset(self.created, self.expires_in)
    }

    pub fn refresh_expires_at(&self) -> Option<DateTime<Utc>> {
        offset(self.created, self.refresh_token_expires_in)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| now >= at)
    }

    pub fn is_refresh_expired(&self, now: DateTime<Utc>) -> bool {
        self.refresh_expires_at().is_some_and(|at| now >= at)
    }

    pub fn to_table(&self, now: DateTime<Utc>) -> String {
        let created_age = (now - self.created).num_seconds();
        let updated_age = (now - self.updated).num_seconds();
        format!(
            "  <table>\n\
             \x20  <tr><th>Login</th><td>{login}</td><td></td></tr>\n\
             \x20  <tr><th>Created</th><td>{created_age}s ago</td><td>{created}</td></tr>\n\
             \x20  <tr><th>Last updated</th><td>{updated_age}s ago</td><td>{updated}</td></tr>\n\
             \x20  <tr><th>Auth Expires In</th><td>t + {expires_in}s</td><td>{expires_at}</td></tr>\n\
             \x20  <tr><th>Refresh Expires In</th><td>t + {refresh_in}s</td><td>{refresh_at}</td></tr>\n\
             \x20  <tr><th>Type</th><td>{token_type}</td><td></td></tr>\n\
             \x20 </table>\n",
            login = self.login,
            created = self.created,
            updated = self.updated,
            expires_in = self.expires_in,
            expires_at = show(self.expires_at()),
            refresh_in = self.refresh_token_expires_in,
            refresh_at = show(self.refresh_expires_at()),
            token_type = self.token_type,
        )
    }

    pub fn to_html(&self, now: DateTime<Utc>) -> String {
        format!("<html>\n <body>\n{} </body>\n</html>\n", self.to_table(now))
    }
}
