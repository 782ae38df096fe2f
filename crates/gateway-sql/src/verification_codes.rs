use chrono::{DateTime, Utc};

/// A row of the `verification_codes` table. A code is redeemable while it's
/// unused and unexpired; `is_used` and expiry are terminal.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VerificationCode {
    pub id: i64,
    pub email: String,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
    pub ip_address: Option<String>,
}

pub async fn create(
    email: &str,
    code: &str,
    expires_at: DateTime<Utc>,
    ip_address: Option<&str>,
    pool: &sqlx::SqlitePool,
) -> sqlx::Result<VerificationCode> {
    sqlx::query_as::<_, VerificationCode>(
        r#"
        insert into verification_codes (email, code, created_at, expires_at, is_used, ip_address)
        values (?1, ?2, ?3, ?4, false, ?5)
        returning *;
        "#,
    )
    .bind(email)
    .bind(code)
    .bind(Utc::now())
    .bind(expires_at)
    .bind(ip_address)
    .fetch_one(pool)
    .await
}

/// Fetch a redeemable code for (email, code): unused and unexpired.
/// Multiple live codes may exist for one email; any of them matches.
pub async fn fetch_redeemable(
    email: &str,
    code: &str,
    pool: &sqlx::SqlitePool,
) -> sqlx::Result<Option<VerificationCode>> {
    sqlx::query_as::<_, VerificationCode>(
        r#"
        select * from verification_codes
        where email = ?1 and code = ?2 and is_used = false and expires_at > ?3;
        "#,
    )
    .bind(email)
    .bind(code)
    .bind(Utc::now())
    .fetch_optional(pool)
    .await
}

/// Mark a code used. Idempotent: marking an already-used code is a no-op.
pub async fn mark_used(id: i64, pool: &sqlx::SqlitePool) -> sqlx::Result<()> {
    sqlx::query("update verification_codes set is_used = true where id = ?1;")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete every expired code, returning how many were removed.
#[tracing::instrument(err, level = "debug", skip(pool))]
pub async fn purge_expired(pool: &sqlx::SqlitePool) -> sqlx::Result<u64> {
    let done = sqlx::query("delete from verification_codes where expires_at < ?1;")
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(done.rows_affected())
}
