pub mod cache;
pub mod meta;
pub mod queue;
pub mod schema;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};

pub use queue::MutationQueue;
pub use schema::run_migrations;

pub type DbPool = Arc<Mutex<Connection>>;

/// Extension trait for logging errors before discarding them
pub trait LogOnError<T> {
    /// Log the error at warn level and return None
    fn log_warn(self, context: &str) -> Option<T>;
    /// Log the error at warn level and return the default
    fn log_warn_default(self, context: &str) -> T
    where
        T: Default;
}

impl<T, E: std::fmt::Display> LogOnError<T> for std::result::Result<T, E> {
    fn log_warn(self, context: &str) -> Option<T> {
        match self {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("{}: {}", context, e);
                None
            }
        }
    }

    fn log_warn_default(self, context: &str) -> T
    where
        T: Default,
    {
        match self {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("{}: {}", context, e);
                T::default()
            }
        }
    }
}

/// Try to acquire the database lock, returning an error if poisoned
pub fn try_lock(pool: &DbPool) -> Result<MutexGuard<'_, Connection>> {
    pool.lock().map_err(|_: PoisonError<_>| {
        tracing::error!("Database mutex poisoned - a thread panicked while holding the lock");
        Error::DatabaseUnavailable
    })
}

/// Open (or create) the local queue database and bring its schema up to date
pub fn init_db(path: &Path) -> Result<DbPool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::Config(format!("cannot create {}: {}", parent.display(), e)))?;
    }

    let conn = Connection::open(path)?;
    run_migrations(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Fresh in-memory database, used by tests and throwaway sessions
pub fn open_in_memory() -> Result<DbPool> {
    let conn = Connection::open_in_memory()?;
    run_migrations(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_warn_default_swallows_error() {
        let failed: std::result::Result<u64, String> = Err("boom".into());
        assert_eq!(failed.log_warn_default("reading count"), 0);
        let ok: std::result::Result<u64, String> = Ok(3);
        assert_eq!(ok.log_warn("reading count"), Some(3));
    }

    #[test]
    fn test_try_lock_reports_poisoned_mutex() {
        let pool = open_in_memory().unwrap();
        let poisoned = pool.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoned.lock().unwrap();
            panic!("poison the lock");
        })
        .join();
        assert!(matches!(try_lock(&pool), Err(Error::DatabaseUnavailable)));
    }

    #[test]
    fn test_init_db_reports_unusable_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let result = init_db(&blocker.join("queue.db"));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
