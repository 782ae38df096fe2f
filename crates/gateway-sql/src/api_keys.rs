use chrono::{DateTime, Utc};

use super::Tier;

/// A row of the `api_keys` table.
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct ApiKey {
    pub id: i64,
    pub key: String,
    pub user_id: String,
    pub tier: Tier,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub created_by: Option<String>,
}

/// Insert a new API key and return the created row.
/// Fails with a unique-violation if `key` collides with an existing secret.
pub async fn create(
    key: &str,
    user_id: &str,
    tier: Tier,
    description: Option<&str>,
    created_by: Option<&str>,
    expires_at: Option<DateTime<Utc>>,
    pool: &sqlx::SqlitePool,
) -> sqlx::Result<ApiKey> {
    let now = Utc::now();
    sqlx::query_as::<_, ApiKey>(
        r#"
        insert into api_keys (key, user_id, tier, is_active, created_at, updated_at, expires_at, description, created_by)
        values (?1, ?2, ?3, true, ?4, ?4, ?5, ?6, ?7)
        returning *;
        "#,
    )
    .bind(key)
    .bind(user_id)
    .bind(tier)
    .bind(now)
    .bind(expires_at)
    .bind(description)
    .bind(created_by)
    .fetch_one(pool)
    .await
}

/// Fetch an API key by its secret string, active or not. Activity and expiry
/// are the authenticator's checks: it distinguishes unknown, deactivated, and
/// expired credentials, and all three fail closed.
pub async fn fetch_by_secret(key: &str, pool: &sqlx::SqlitePool) -> sqlx::Result<Option<ApiKey>> {
    sqlx::query_as::<_, ApiKey>("select * from api_keys where key = ?1;")
        .bind(key)
        .fetch_optional(pool)
        .await
}

pub async fn fetch_by_id(id: i64, pool: &sqlx::SqlitePool) -> sqlx::Result<Option<ApiKey>> {
    sqlx::query_as::<_, ApiKey>("select * from api_keys where id = ?1;")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Page over all API keys, most recently created first.
pub async fn list(offset: i64, limit: i64, pool: &sqlx::SqlitePool) -> sqlx::Result<Vec<ApiKey>> {
    sqlx::query_as::<_, ApiKey>(
        "select * from api_keys order by created_at desc limit ?1 offset ?2;",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

/// Update the mutable attributes of a key. `None` fields are left unchanged.
/// Returns None if no such key exists.
pub async fn update(
    id: i64,
    tier: Option<Tier>,
    is_active: Option<bool>,
    description: Option<&str>,
    pool: &sqlx::SqlitePool,
) -> sqlx::Result<Option<ApiKey>> {
    sqlx::query_as::<_, ApiKey>(
        r#"
        update api_keys set
            tier = coalesce(?2, tier),
            is_active = coalesce(?3, is_active),
            description = coalesce(?4, description),
            updated_at = ?5
        where id = ?1
        returning *;
        "#,
    )
    .bind(id)
    .bind(tier)
    .bind(is_active)
    .bind(description)
    .bind(Utc::now())
    .fetch_optional(pool)
    .await
}

/// Deactivate a key. Keys are never hard-deleted, so request logs retain a
/// resolvable `api_key_id`. Returns false if no such key exists.
pub async fn soft_delete(id: i64, pool: &sqlx::SqlitePool) -> sqlx::Result<bool> {
    let done = sqlx::query("update api_keys set is_active = false, updated_at = ?2 where id = ?1;")
        .bind(id)
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(done.rows_affected() > 0)
}

/// All keys which belong to `user_id`, active or not.
pub async fn fetch_by_user(user_id: &str, pool: &sqlx::SqlitePool) -> sqlx::Result<Vec<ApiKey>> {
    sqlx::query_as::<_, ApiKey>(
        "select * from api_keys where user_id = ?1 order by created_at desc;",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

#[cfg(test)]
mod test {
    use super::super::Tier;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn create_fetch_update_and_soft_delete() {
        let pool = crate::test_pool().await;

        let key = super::create(
            "sk-internal-test",
            "alice@example.com",
            Tier::Standard,
            Some("ci"),
            Some("admin"),
            None,
            &pool,
        )
        .await
        .unwrap();
        assert_eq!(key.tier, Tier::Standard);
        assert!(key.is_active);
        assert_eq!(key.description.as_deref(), Some("ci"));

        // Secret collisions are rejected by the unique index.
        let err = super::create(
            "sk-internal-test",
            "bob@example.com",
            Tier::Free,
            None,
            None,
            None,
            &pool,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("UNIQUE"));

        let fetched = super::fetch_by_secret("sk-internal-test", &pool)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.id, key.id);

        let updated = super::update(key.id, Some(Tier::Premium), None, None, &pool)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.tier, Tier::Premium);
        assert!(updated.is_active);
        assert!(updated.updated_at >= key.updated_at);

        assert!(super::soft_delete(key.id, &pool).await.unwrap());
        // Soft deletion flips is_active but the row survives both lookups.
        assert!(!super::fetch_by_secret("sk-internal-test", &pool)
            .await
            .unwrap()
            .unwrap()
            .is_active);
        assert!(!super::fetch_by_id(key.id, &pool)
            .await
            .unwrap()
            .unwrap()
            .is_active);

        assert!(!super::soft_delete(9999, &pool).await.unwrap());
        assert!(super::update(9999, None, Some(false), None, &pool)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn listing_is_paged_and_by_user() {
        let pool = crate::test_pool().await;

        for i in 0..4 {
            let user = if i % 2 == 0 { "even@example.com" } else { "odd@example.com" };
            super::create(&format!("sk-internal-{i}"), user, Tier::Free, None, None, None, &pool)
                .await
                .unwrap();
        }

        let page = super::list(1, 2, &pool).await.unwrap();
        assert_eq!(page.len(), 2);

        let evens = super::fetch_by_user("even@example.com", &pool).await.unwrap();
        assert_eq!(evens.len(), 2);
        super::soft_delete(evens[0].id, &pool).await.unwrap();
        // fetch_by_user reports inactive keys too.
        assert_eq!(super::fetch_by_user("even@example.com", &pool).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn expiry_is_stored_and_round_trips() {
        let pool = crate::test_pool().await;
        let expires = Utc::now() + Duration::days(30);

        let key = super::create(
            "sk-internal-expiring",
            "carol@example.com",
            Tier::Free,
            None,
            None,
            Some(expires),
            &pool,
        )
        .await
        .unwrap();

        let fetched = super::fetch_by_secret("sk-internal-expiring", &pool)
            .await
            .unwrap()
            .unwrap();
        let stored = fetched.expires_at.unwrap();
        assert!((stored - expires).num_seconds().abs() <= 1);
        let _ = key;
    }
}
