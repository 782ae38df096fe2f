pub mod api;
pub mod emails;
pub mod rate_limiter;
pub mod upstream;

pub use gateway_sql::Tier;
