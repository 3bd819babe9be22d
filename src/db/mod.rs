use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info};
use rusqlite::{params, Connection};
use tokio::sync::oneshot;

mod migrations;
pub mod models;

use migrations::run_migrations;
pub use models::AdRewardClaim;

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join DB thread: {join_err:?}");
            }
        }
    }
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid datetime '{value}': {err}"))
}

/// All access goes through a dedicated worker thread holding the single
/// SQLite connection; callers submit closures and await the reply.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("adgate-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }
                if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
                    error!("Failed to enable foreign keys: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run database migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Database thread shutting down");
            })
            .with_context(|| "failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        info!("Database initialized at {}", db_path.as_path().display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("DB caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to DB thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread terminated unexpectedly"))?
    }

    /// Records one granted reward and bumps the balance in the same
    /// transaction. Returns the balance after the grant.
    pub async fn record_ad_claim(&self, claim: &AdRewardClaim) -> Result<i64> {
        let record = claim.clone();
        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open claim transaction")?;

            tx.execute(
                "INSERT INTO ad_reward_claims (id, credits, claimed_at)
                 VALUES (?1, ?2, ?3)",
                params![record.id, record.credits, record.claimed_at.to_rfc3339()],
            )
            .with_context(|| "failed to insert reward claim")?;

            tx.execute(
                "UPDATE credits
                 SET balance = balance + ?1,
                     updated_at = ?2
                 WHERE id = 1",
                params![record.credits, record.claimed_at.to_rfc3339()],
            )
            .with_context(|| "failed to update credit balance")?;

            let new_balance: i64 = tx
                .query_row("SELECT balance FROM credits WHERE id = 1", [], |row| {
                    row.get(0)
                })
                .with_context(|| "failed to read credit balance")?;

            tx.commit().context("failed to commit claim transaction")?;
            Ok(new_balance)
        })
        .await
    }

    pub async fn get_credit_balance(&self) -> Result<i64> {
        self.execute(|conn| {
            conn.query_row("SELECT balance FROM credits WHERE id = 1", [], |row| {
                row.get(0)
            })
            .with_context(|| "failed to read credit balance")
        })
        .await
    }

    pub async fn list_ad_claims(&self, limit: u32) -> Result<Vec<AdRewardClaim>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, credits, claimed_at
                 FROM ad_reward_claims
                 ORDER BY claimed_at DESC
                 LIMIT ?1",
            )?;

            let mut rows = stmt.query(params![limit])?;
            let mut claims = Vec::new();
            while let Some(row) = rows.next()? {
                claims.push(AdRewardClaim {
                    id: row.get(0)?,
                    credits: row.get(1)?,
                    claimed_at: parse_datetime(&row.get::<_, String>(2)?)?,
                });
            }

            Ok(claims)
        })
        .await
    }
}
