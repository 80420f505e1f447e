use super::UserStore;
use accountd_core::{StoreError, types::User};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use std::time::Duration;

const UNIQUE_VIOLATION: &str = "23505";

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        account_id TEXT NOT NULL,
        name TEXT NOT NULL,
        email TEXT NOT NULL,
        role TEXT NOT NULL DEFAULT '',
        password TEXT NOT NULL DEFAULT ''
    )
"#;

// Named like a column constraint so `map_err` reports the field as `email`.
const CREATE_EMAIL_INDEX: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS users_email_key ON users (lower(email))";

/// `users` table in PostgreSQL.
///
/// The pool is shared by all bulk workers; uniqueness of `email` is left to
/// a unique index on `lower(email)`. Emails are stored trimmed, matching
/// [`super::MemoryUserStore`].
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    /// Connects to `database_url` and creates the `users` table if needed.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(map_err)?;

        for statement in [CREATE_TABLE, CREATE_EMAIL_INDEX] {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(map_err)?;
        }

        Ok(Self { pool })
    }
}

fn map_err(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            // Postgres names the constraint `users_<column>_key`.
            let field = db
                .constraint()
                .map(|c| c.trim_start_matches("users_").trim_end_matches("_key"))
                .unwrap_or("email");
            return StoreError::Duplicate {
                field: field.to_string(),
            };
        }
    }
    StoreError::Unavailable {
        context: err.to_string(),
    }
}

// Identifiers are BIGSERIAL, so they always fit in an i64.
fn to_db_id(id: u64) -> Result<i64, StoreError> {
    i64::try_from(id).map_err(|_| StoreError::NotFound { id })
}

fn from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    let id: i64 = row.try_get("id")?;
    Ok(User {
        id: id as u64,
        account_id: row.try_get("account_id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        role: row.try_get("role")?,
        password: row.try_get("password")?,
    })
}

#[tonic::async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: &User) -> Result<u64, StoreError> {
        user.validate()?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO users (account_id, name, email, role, password) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(&user.account_id)
        .bind(&user.name)
        .bind(user.email.trim())
        .bind(&user.role)
        .bind(&user.password)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)?;

        Ok(id as u64)
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        user.validate()?;

        let result = sqlx::query(
            "UPDATE users SET account_id = $2, name = $3, email = $4, role = $5, password = $6 \
             WHERE id = $1",
        )
        .bind(to_db_id(user.id)?)
        .bind(&user.account_id)
        .bind(&user.name)
        .bind(user.email.trim())
        .bind(&user.role)
        .bind(&user.password)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { id: user.id });
        }
        Ok(())
    }

    async fn get(&self, id: u64) -> Result<User, StoreError> {
        let row = sqlx::query(
            "SELECT id, account_id, name, email, role, password FROM users WHERE id = $1",
        )
        .bind(to_db_id(id)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?
        .ok_or(StoreError::NotFound { id })?;

        from_row(&row).map_err(map_err)
    }

    async fn delete(&self, id: u64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(to_db_id(id)?)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { id });
        }
        Ok(())
    }
}
