use anyhow::Context;
use clap::Parser;
use futures::FutureExt;

use gateway::api;
use gateway::emails;
use gateway::rate_limiter::{RateLimiter, RateLimits, TierLimits};
use gateway::upstream::UpstreamClient;

/// Gateway is the authenticating, rate-limiting edge in front of an
/// OpenAI-compatible inference upstream, with self-service credential
/// issuance and an operator plane for key management.
#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// URL of the SQLite database.
    #[clap(long = "database", env = "DATABASE_URL", default_value = "sqlite://llm_api.db")]
    database_url: String,
    /// Base URL of the upstream inference server.
    #[clap(long = "upstream", env = "LLM_BACKEND_URL", default_value = "http://localhost:8001")]
    upstream_url: url::Url,
    /// Model identifier advertised when the upstream can't list its models.
    #[clap(long, env = "DEFAULT_MODEL", default_value = "meta-llama/Llama-2-7b-chat-hf")]
    default_model: String,
    /// Port of the edge listener.
    #[clap(long, env = "GATEWAY_PORT", default_value = "8000")]
    gateway_port: u16,
    /// Port of the admin listener.
    #[clap(long, env = "ADMIN_PORT", default_value = "8002")]
    admin_port: u16,
    /// Secret which signs admin access tokens. Rotate it in production.
    #[clap(
        long,
        env = "ADMIN_SECRET_KEY",
        default_value = "change-this-secret-key-in-production",
        hide_env_values = true
    )]
    admin_secret_key: String,
    /// Minutes an admin access token stays valid.
    #[clap(long, env = "ADMIN_TOKEN_EXPIRE_MINUTES", default_value = "60")]
    admin_token_expire_minutes: i64,
    /// Free-tier requests admitted per minute.
    #[clap(long, env = "RATE_LIMIT_FREE_PER_MINUTE", default_value = "10")]
    rate_limit_free_per_minute: usize,
    /// Free-tier requests admitted per hour.
    #[clap(long, env = "RATE_LIMIT_FREE_PER_HOUR", default_value = "100")]
    rate_limit_free_per_hour: usize,
    /// Standard-tier requests admitted per minute.
    #[clap(long, env = "RATE_LIMIT_STANDARD_PER_MINUTE", default_value = "30")]
    rate_limit_standard_per_minute: usize,
    /// Standard-tier requests admitted per hour.
    #[clap(long, env = "RATE_LIMIT_STANDARD_PER_HOUR", default_value = "300")]
    rate_limit_standard_per_hour: usize,
    /// Premium-tier requests admitted per minute.
    #[clap(long, env = "RATE_LIMIT_PREMIUM_PER_MINUTE", default_value = "100")]
    rate_limit_premium_per_minute: usize,
    /// Premium-tier requests admitted per hour.
    #[clap(long, env = "RATE_LIMIT_PREMIUM_PER_HOUR", default_value = "1000")]
    rate_limit_premium_per_hour: usize,
    /// Origin to allow in CORS contexts; `*` allows any. May be specified
    /// multiple times.
    #[clap(long = "allow-origin", env = "CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    allow_origin: Vec<String>,
    /// Email domain allowed to request self-service credentials. May be
    /// specified multiple times.
    #[clap(
        long = "allowed-email-domain",
        env = "ALLOWED_EMAIL_DOMAINS",
        value_delimiter = ',',
        default_value = "company.com,company.co.kr"
    )]
    allowed_email_domains: Vec<String>,
    /// Minutes a verification code stays redeemable.
    #[clap(long, env = "VERIFICATION_CODE_EXPIRE_MINUTES", default_value = "5")]
    verification_code_expire_minutes: i64,
    /// SMTP relay host.
    #[clap(long, env = "SMTP_HOST", default_value = "localhost")]
    smtp_host: String,
    /// SMTP relay port.
    #[clap(long, env = "SMTP_PORT", default_value = "587")]
    smtp_port: u16,
    /// SMTP username. Leaving it empty implies the mock sender.
    #[clap(long, env = "SMTP_USER", default_value = "")]
    smtp_user: String,
    /// SMTP password.
    #[clap(long, env = "SMTP_PASSWORD", default_value = "", hide_env_values = true)]
    smtp_password: String,
    /// From address on verification emails.
    #[clap(long, env = "SMTP_FROM_EMAIL", default_value = "noreply@company.com")]
    smtp_from_email: String,
    /// Print verification codes to stderr instead of sending email.
    #[clap(
        long,
        env = "USE_MOCK_EMAIL",
        action = clap::ArgAction::Set,
        default_value = "true"
    )]
    use_mock_email: bool,
}

fn main() -> Result<(), anyhow::Error> {
    // Use reasonable defaults for printing structured logs to stderr.
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(!matches!(std::env::var("NO_COLOR"), Ok(v) if v == "1"))
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");

    let args = Args::parse();
    tracing::info!(
        gateway_port = args.gateway_port,
        admin_port = args.admin_port,
        upstream = %args.upstream_url,
        "started!"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let task = runtime.spawn(async move { async_main(args).await });
    let result = runtime.block_on(task);

    tracing::info!(?result, "main function completed, shutting down runtime");
    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    result?
}

async fn async_main(args: Args) -> Result<(), anyhow::Error> {
    // Bind early in the application lifecycle, to not fail requests which may
    // dispatch as soon as the process is up.
    let edge_listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.gateway_port))
        .await
        .context("failed to bind gateway port")?;
    let admin_listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.admin_port))
        .await
        .context("failed to bind admin port")?;

    let pool = gateway_sql::connect(&args.database_url)
        .await
        .context("connecting to database")?;
    gateway_sql::install_schema(&pool)
        .await
        .context("installing database schema")?;
    bootstrap_admin(&pool).await?;

    let limits = RateLimits {
        free: TierLimits {
            per_minute: args.rate_limit_free_per_minute,
            per_hour: args.rate_limit_free_per_hour,
        },
        standard: TierLimits {
            per_minute: args.rate_limit_standard_per_minute,
            per_hour: args.rate_limit_standard_per_hour,
        },
        premium: TierLimits {
            per_minute: args.rate_limit_premium_per_minute,
            per_hour: args.rate_limit_premium_per_hour,
        },
    };

    let upstream = UpstreamClient::new(&args.upstream_url, args.default_model.clone())
        .context("building upstream client")?;
    let emails = emails::select(
        args.use_mock_email,
        emails::SmtpSettings {
            host: args.smtp_host.clone(),
            port: args.smtp_port,
            user: args.smtp_user.clone(),
            password: args.smtp_password.clone(),
            from_email: args.smtp_from_email.clone(),
        },
    )
    .context("configuring email transport")?;

    let app = std::sync::Arc::new(api::App::new(
        pool,
        RateLimiter::new(limits),
        upstream,
        emails,
        &args.admin_secret_key,
        args.admin_token_expire_minutes,
        args.allowed_email_domains.clone(),
        args.verification_code_expire_minutes,
        format!("http://127.0.0.1:{}/health", args.admin_port),
    ));

    let (edge_router, admin_router) = api::build_routers(app, &args.allow_origin)?;

    // Share-able future which completes when the gateway should exit.
    let shutdown = tokio::signal::ctrl_c().map(|_| ()).shared();

    let edge_server = axum::serve(
        edge_listener,
        edge_router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone());
    let edge_server = async move { Ok::<(), anyhow::Error>(edge_server.await?) };

    let admin_server = axum::serve(
        admin_listener,
        admin_router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown);
    let admin_server = async move { Ok::<(), anyhow::Error>(admin_server.await?) };

    let ((), ()) = tokio::try_join!(edge_server, admin_server)?;
    Ok(())
}

/// On first start with no admin principals, create the well-known default
/// and warn. The default password exists to be rotated.
async fn bootstrap_admin(pool: &sqlx::SqlitePool) -> Result<(), anyhow::Error> {
    if gateway_sql::admin_users::count(pool).await? > 0 {
        return Ok(());
    }

    let hashed = tokio::task::spawn_blocking(|| bcrypt::hash("admin123", bcrypt::DEFAULT_COST))
        .await
        .context("joining password hash task")?
        .context("hashing default admin password")?;
    gateway_sql::admin_users::create("admin", &hashed, Some("admin@localhost"), pool).await?;

    tracing::warn!(
        "created default admin user `admin` with password `admin123`; \
         PLEASE CHANGE THE DEFAULT PASSWORD"
    );
    Ok(())
}
