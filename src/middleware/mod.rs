pub mod auth;
pub mod idempotency;
pub mod ip_filter;
pub mod request_logger;
