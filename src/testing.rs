//! Test utilities for on-disk database setup.
//!
//! Reuses the real `init_db` so tests run against the authoritative schema.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use crate::config::SyncConfig;
use crate::db::{self, DbPool};
use crate::remote::MemoryRemote;
use crate::session::StudySession;

/// Queue database in a temporary directory, removed when dropped
pub struct TestEnv {
    /// Temporary directory (kept alive for database file persistence)
    pub temp: TempDir,
    pub pool: DbPool,
}

impl TestEnv {
    /// Panics if the temporary directory or database cannot be created
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let pool = db::init_db(&temp.path().join("queue.db")).expect("Failed to initialize test database");
        Self { temp, pool }
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn db_path(&self) -> PathBuf {
        self.temp.path().join("queue.db")
    }

    /// Open the same file again, as a restarted process would
    pub fn reopen(&self) -> crate::Result<DbPool> {
        db::init_db(&self.db_path())
    }

    pub fn session(&self, remote: Arc<MemoryRemote>, online: bool) -> crate::Result<StudySession<MemoryRemote>> {
        StudySession::new(self.pool.clone(), remote, SyncConfig::default(), online)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Mutation;
    use crate::sync::{DrainOutcome, SyncRunner};

    #[test]
    fn test_env_creates_database_file() {
        let env = TestEnv::new();
        assert!(env.db_path().exists());
        assert!(env.path().is_dir());
    }

    #[tokio::test]
    async fn test_queue_survives_restart() {
        let env = TestEnv::new();
        let remote = Arc::new(MemoryRemote::new());
        remote.set_online(false);

        let session = env.session(remote.clone(), false).unwrap();
        session.complete_lesson("u1").await.unwrap();
        session.award_review_xp("u1", 12.0).await.unwrap();
        drop(session);

        // Simulated restart: fresh connection, fresh runner, same file
        let pool = env.reopen().unwrap();
        let queue = db::MutationQueue::new(pool.clone());
        let pending = queue.dequeue_batch(10).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(
            pending[0].mutation,
            Mutation::XpAward {
                user_id: "u1".into(),
                amount: 10
            }
        );

        remote.set_online(true);
        let runner = SyncRunner::new(pool, remote.clone(), SyncConfig::default(), false).unwrap();
        assert_eq!(runner.state().pending_count, 2);

        let outcome = runner.on_connectivity_changed(true).await.unwrap();
        assert!(matches!(outcome, DrainOutcome::Completed { applied: 2, .. }));
        assert_eq!(remote.write_attempts(), 2);
        assert_eq!(queue.count().unwrap(), 0);
    }
}
