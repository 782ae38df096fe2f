use chrono::{DateTime, Utc};

/// A row of the `admin_users` table. `hashed_password` is a bcrypt digest;
/// plaintext passwords are never persisted or logged.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AdminUser {
    pub id: i64,
    pub username: String,
    pub hashed_password: String,
    pub email: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

pub async fn create(
    username: &str,
    hashed_password: &str,
    email: Option<&str>,
    pool: &sqlx::SqlitePool,
) -> sqlx::Result<AdminUser> {
    sqlx::query_as::<_, AdminUser>(
        r#"
        insert into admin_users (username, hashed_password, email, is_active, created_at)
        values (?1, ?2, ?3, true, ?4)
        returning *;
        "#,
    )
    .bind(username)
    .bind(hashed_password)
    .bind(email)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
}

/// Fetch an active admin principal by username.
pub async fn fetch_active(username: &str, pool: &sqlx::SqlitePool) -> sqlx::Result<Option<AdminUser>> {
    sqlx::query_as::<_, AdminUser>(
        "select * from admin_users where username = ?1 and is_active = true;",
    )
    .bind(username)
    .fetch_optional(pool)
    .await
}

pub async fn update_last_login(id: i64, pool: &sqlx::SqlitePool) -> sqlx::Result<()> {
    sqlx::query("update admin_users set last_login = ?2 where id = ?1;")
        .bind(id)
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn count(pool: &sqlx::SqlitePool) -> sqlx::Result<i64> {
    sqlx::query_scalar("select count(*) from admin_users;")
        .fetch_one(pool)
        .await
}

#[cfg(test)]
mod test {
    #[tokio::test]
    async fn admin_lifecycle() {
        let pool = crate::test_pool().await;
        assert_eq!(super::count(&pool).await.unwrap(), 0);

        let admin = super::create("admin", "$2b$12$fake-digest", Some("root@localhost"), &pool)
            .await
            .unwrap();
        assert_eq!(super::count(&pool).await.unwrap(), 1);
        assert!(admin.last_login.is_none());

        super::update_last_login(admin.id, &pool).await.unwrap();
        let fetched = super::fetch_active("admin", &pool).await.unwrap().unwrap();
        assert!(fetched.last_login.is_some());

        assert!(super::fetch_active("nobody", &pool).await.unwrap().is_none());
    }
}
