// Schema for the credential store. Files under `migrations/` are embedded at
// build time and applied in version order; applied versions are recorded in
// `_sqlx_migrations`.

use sqlx::migrate::Migrator;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");
