use chrono::{Duration, Utc};

/// Fields of a request-log row to append. `total_tokens` is derived.
#[derive(Debug, Clone, Default)]
pub struct NewRequestLog<'a> {
    pub user_id: &'a str,
    pub api_key_id: Option<i64>,
    pub endpoint: &'a str,
    pub method: &'a str,
    pub status_code: u16,
    pub duration_ms: f64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub model: Option<&'a str>,
    pub error: Option<&'a str>,
}

/// Append one request-log row. The table is append-only: rows are never
/// updated or deleted, and readers order by `timestamp` rather than id.
pub async fn create(log: NewRequestLog<'_>, pool: &sqlx::SqlitePool) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        insert into request_logs (
            user_id, api_key_id, endpoint, method, status_code, duration_ms,
            prompt_tokens, completion_tokens, total_tokens, model, error, timestamp
        ) values (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12);
        "#,
    )
    .bind(log.user_id)
    .bind(log.api_key_id)
    .bind(log.endpoint)
    .bind(log.method)
    .bind(log.status_code as i64)
    .bind(log.duration_ms)
    .bind(log.prompt_tokens)
    .bind(log.completion_tokens)
    .bind(log.prompt_tokens + log.completion_tokens)
    .bind(log.model)
    .bind(log.error)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// One calendar date of aggregated usage.
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct UsageStat {
    pub date: String,
    pub requests: i64,
    pub total_tokens: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
}

/// Usage over the trailing `days`, grouped by calendar date, optionally
/// scoped to one user.
pub async fn usage_stats(
    user_id: Option<&str>,
    days: i64,
    pool: &sqlx::SqlitePool,
) -> sqlx::Result<Vec<UsageStat>> {
    let since = Utc::now() - Duration::days(days);
    sqlx::query_as::<_, UsageStat>(
        r#"
        select
            date(timestamp) as date,
            count(id) as requests,
            coalesce(sum(total_tokens), 0) as total_tokens,
            coalesce(sum(prompt_tokens), 0) as prompt_tokens,
            coalesce(sum(completion_tokens), 0) as completion_tokens
        from request_logs
        where timestamp >= ?1 and (?2 is null or user_id = ?2)
        group by date(timestamp)
        order by date(timestamp) asc;
        "#,
    )
    .bind(since)
    .bind(user_id)
    .fetch_all(pool)
    .await
}
