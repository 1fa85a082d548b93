use std::{path::PathBuf, sync::mpsc, thread};

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use rusqlite::Connection;
use tokio::sync::oneshot;

pub mod gateway;
pub mod helpers;
pub mod migrations;
pub mod models;
pub mod repositories;

pub use gateway::{ResultsGateway, SavedResult};
pub use models::{
    AiMeta, Inspection, InspectionProgress, InspectionStatus, ResultStatus, SpecResult,
};

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

/// Handle to the SQLite worker. All statements run on one dedicated thread;
/// callers submit a closure and await its reply. The worker exits once the
/// last handle is dropped and the job channel disconnects.
#[derive(Clone)]
pub struct Database {
    jobs: mpsc::Sender<Job>,
}

impl Database {
    /// Opens (or creates) the database file, applies pragmas and pending
    /// schema steps, then parks the connection on its worker thread. Bring-up
    /// happens on the calling thread so a bad path or schema fails here.
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let mut conn = Connection::open(&db_path)
            .with_context(|| format!("failed to open SQLite database {}", db_path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL mode")?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("failed to enable foreign key enforcement")?;
        migrations::apply_pending(&mut conn).context("failed to migrate database schema")?;

        let (jobs, inbox) = mpsc::channel::<Job>();
        thread::Builder::new()
            .name("fieldlens-db".into())
            .spawn(move || {
                while let Ok(job) = inbox.recv() {
                    job(&mut conn);
                }
                debug!("Database worker stopped");
            })
            .context("failed to spawn database worker thread")?;

        info!("Database ready at {}", db_path.display());
        Ok(Self { jobs })
    }

    /// Runs `job` on the worker thread and returns whatever it produces.
    pub async fn execute<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, answer) = oneshot::channel();
        self.jobs
            .send(Box::new(move |conn: &mut Connection| {
                let _ = reply.send(job(conn));
            }))
            .map_err(|_| anyhow!("database worker is no longer running"))?;

        answer
            .await
            .map_err(|_| anyhow!("database worker dropped the job"))?
    }
}
