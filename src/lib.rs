//! Backend core of a school discipline tracker: tenant-scoped rosters,
//! rule book ("pasal"/"ayat"), violation records with derived point
//! balances, and a zip backup/restore pipeline.

pub mod assets;
pub mod auth;
pub mod backup;
pub mod categories;
pub mod classrooms;
pub mod db;
pub mod error;
pub mod id;
pub mod migrate;
pub mod reporting;
pub mod rules;
pub mod schools;
pub mod students;
pub mod time;
pub mod users;
pub mod violations;

pub use error::{AppError, AppResult};

/// Install the tracing subscriber for binaries. `TATIB_LOG` overrides the
/// default filter.
pub fn init_logging() {
    let _ = tracing_log::LogTracer::init();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(std::env::var("TATIB_LOG").unwrap_or_else(|_| "tatib=info,sqlx=warn".into()))
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}
