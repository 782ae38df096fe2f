pub mod admin_users;
pub mod api_keys;
pub mod request_logs;
pub mod verification_codes;

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Tier of an API credential, which determines its rate limits.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Standard,
    Premium,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Free => f.write_str("free"),
            Tier::Standard => f.write_str("standard"),
            Tier::Premium => f.write_str("premium"),
        }
    }
}

impl FromStr for Tier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Tier::Free),
            "standard" => Ok(Tier::Standard),
            "premium" => Ok(Tier::Premium),
            other => anyhow::bail!("invalid tier {other:?}: must be free, standard, or premium"),
        }
    }
}

/// Open a SQLite pool for the given database URL, creating the database
/// file if it doesn't exist yet.
///
/// An in-memory database (`sqlite::memory:`) is held open on a single
/// pooled connection with reaping disabled, as the database lives and dies
/// with its connection.
pub async fn connect(database_url: &str) -> sqlx::Result<sqlx::SqlitePool> {
    let options = sqlx::sqlite::SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .busy_timeout(std::time::Duration::from_secs(5));

    let mut pool = sqlx::sqlite::SqlitePoolOptions::new().max_connections(5);

    if database_url.contains(":memory:") {
        pool = pool
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }

    pool.connect_with(options).await
}

/// Install the schema if it's not present. Every statement is idempotent,
/// so this runs unconditionally at process start.
pub async fn install_schema(pool: &sqlx::SqlitePool) -> sqlx::Result<()> {
    for statement in [
        r#"
        create table if not exists api_keys (
            id          integer primary key,
            key         text not null,
            user_id     text not null,
            tier        text not null default 'standard',
            is_active   boolean not null default true,
            created_at  datetime not null,
            updated_at  datetime not null,
            expires_at  datetime,
            description text,
            created_by  text
        );
        "#,
        "create unique index if not exists idx_api_keys_key on api_keys (key);",
        "create index if not exists idx_api_keys_user_id on api_keys (user_id);",
        r#"
        create table if not exists users (
            id         integer primary key,
            username   text not null unique,
            email      text unique,
            is_admin   boolean not null default false,
            is_active  boolean not null default true,
            created_at datetime not null,
            updated_at datetime not null
        );
        "#,
        r#"
        create table if not exists request_logs (
            id                integer primary key,
            user_id           text not null,
            api_key_id        integer,
            endpoint          text not null,
            method            text not null,
            status_code       integer not null,
            duration_ms       real not null,
            prompt_tokens     integer not null default 0,
            completion_tokens integer not null default 0,
            total_tokens      integer not null default 0,
            model             text,
            error             text,
            timestamp         datetime not null
        );
        "#,
        "create index if not exists idx_request_logs_user_timestamp on request_logs (user_id, timestamp);",
        "create index if not exists idx_request_logs_endpoint_timestamp on request_logs (endpoint, timestamp);",
        r#"
        create table if not exists admin_users (
            id              integer primary key,
            username        text not null unique,
            hashed_password text not null,
            email           text unique,
            is_active       boolean not null default true,
            created_at      datetime not null,
            last_login      datetime
        );
        "#,
        r#"
        create table if not exists verification_codes (
            id         integer primary key,
            email      text not null,
            code       text not null,
            created_at datetime not null,
            expires_at datetime not null,
            is_used    boolean not null default false,
            ip_address text
        );
        "#,
        "create index if not exists idx_verification_codes_email on verification_codes (email);",
    ] {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> sqlx::SqlitePool {
    let pool = connect("sqlite::memory:").await.unwrap();
    install_schema(&pool).await.unwrap();
    pool
}

#[cfg(test)]
mod test {
    use super::Tier;

    #[test]
    fn tier_round_trips_through_strings() {
        for (tier, repr) in [
            (Tier::Free, "free"),
            (Tier::Standard, "standard"),
            (Tier::Premium, "premium"),
        ] {
            assert_eq!(tier.to_string(), repr);
            assert_eq!(repr.parse::<Tier>().unwrap(), tier);
        }
        assert!("platinum".parse::<Tier>().is_err());
    }

    #[tokio::test]
    async fn schema_installs_idempotently() {
        let pool = super::test_pool().await;
        super::install_schema(&pool).await.unwrap();
    }
}
