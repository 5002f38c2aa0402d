// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! User Registry: a refreshed username -> user id map, and the write-behind worker-name
//! persistence queue. Two independent pieces of state, sharing only the `last_max_user_id`
//! watermark used to ask the user-list endpoint for just the new rows.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use sqlx::mysql::MySqlPool;
use sqlx::Row;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use pool_logging::macros::*;

const REFRESH_INTERVAL: Duration = Duration::from_secs(10);
const WRITER_IDLE_INTERVAL: Duration = Duration::from_secs(1);
const WRITER_RETRY_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct UserListResponse {
    data: HashMap<String, u64>,
}

/// Shared username -> user id lookup, refreshed incrementally from the user-list HTTP endpoint.
pub struct UserRegistry {
    http: reqwest::Client,
    base_url: String,
    names: Arc<tokio::sync::RwLock<HashMap<String, u64>>>,
    last_max_user_id: AtomicU64,
}

impl UserRegistry {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            names: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
            last_max_user_id: AtomicU64::new(0),
        }
    }

    pub fn names(&self) -> Arc<tokio::sync::RwLock<HashMap<String, u64>>> {
        Arc::clone(&self.names)
    }

    /// Drains the endpoint repeatedly until a refresh reports zero new rows, so a cold start
    /// doesn't let the reactor accept connections against a near-empty map.
    pub async fn catch_up(&self) {
        loop {
            match self.refresh_once().await {
                Ok(0) => break,
                Ok(_) => continue,
                Err(err) => {
                    error!("user registry catch-up refresh failed"; "error" => %err);
                    sleep(WRITER_RETRY_BACKOFF).await;
                }
            }
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("user registry refresh loop shutting down");
                    return;
                }
                _ = sleep(REFRESH_INTERVAL) => {
                    if let Err(err) = self.refresh_once().await {
                        warn!("user registry refresh failed"; "error" => %err);
                    }
                }
            }
        }
    }

    async fn refresh_once(&self) -> Result<usize, reqwest::Error> {
        let last_id = self.last_max_user_id.load(Ordering::Acquire);
        let response = self
            .http
            .get(&self.base_url)
            .query(&[("last_id", last_id)])
            .send()
            .await?
            .error_for_status()?
            .json::<UserListResponse>()
            .await?;

        let added = response.data.len();
        if added == 0 {
            return Ok(0);
        }

        let mut max_id = last_id;
        let mut names = self.names.write().await;
        for (name, id) in response.data {
            max_id = max_id.max(id);
            names.insert(name, id);
        }
        drop(names);

        self.last_max_user_id.store(max_id, Ordering::Release);
        debug!("user registry refreshed"; "added" => added, "last_max_user_id" => max_id);
        Ok(added)
    }
}

/// Derives the numeric worker id `mining_workers` is keyed on from a miner's worker-name string.
/// The upstream pool assigns this id somewhere ahead of the Stratum session (a separate worker
/// registration step not part of this server), so here it is taken deterministically from the
/// name itself: the same worker name always maps to the same row.
pub fn derive_worker_id(worker_name: &str) -> i64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    worker_name.hash(&mut hasher);
    (hasher.finish() & 0x7fff_ffff_ffff_ffff) as i64
}

/// A worker-name observation waiting to be persisted. `group_id` follows the spec's encoding:
/// the negation of the owning user id.
#[derive(Debug, Clone)]
pub struct WorkerNameEntry {
    pub user_id: u64,
    pub worker_id: i64,
    pub worker_name: String,
}

/// Write-behind queue for worker names, drained by a dedicated task that owns the MySQL pool.
/// Peek-then-pop: a failed write leaves the entry at the head of the queue for the next tick.
pub struct WorkerNameWriter {
    pool: MySqlPool,
    queue: Arc<Mutex<VecDeque<WorkerNameEntry>>>,
}

impl WorkerNameWriter {
    pub fn new(pool: MySqlPool) -> Self {
        Self {
            pool,
            queue: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn queue(&self) -> Arc<Mutex<VecDeque<WorkerNameEntry>>> {
        Arc::clone(&self.queue)
    }

    pub fn enqueue(&self, entry: WorkerNameEntry) {
        self.queue.lock().expect("worker name queue poisoned").push_back(entry);
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                info!("worker name writer shutting down");
                return;
            }

            let next = self.queue.lock().expect("worker name queue poisoned").front().cloned();
            let Some(entry) = next else {
                tokio::select! {
                    _ = shutdown.cancelled() => continue,
                    _ = sleep(WRITER_IDLE_INTERVAL) => continue,
                }
            };

            match self.persist(&entry).await {
                Ok(()) => {
                    self.queue.lock().expect("worker name queue poisoned").pop_front();
                }
                Err(err) => {
                    error!("worker name write failed, retrying"; "worker_name" => %entry.worker_name, "error" => %err);
                    sleep(WRITER_RETRY_BACKOFF).await;
                }
            }
        }
    }

    /// `SELECT` the current row by `(uid, worker_id)`, then either `UPDATE` an existing worker
    /// whose `group_id` marks it deleted (or whose name was never set), leave it alone otherwise,
    /// or `INSERT ... ON DUPLICATE KEY UPDATE` a fresh one — the literal three-way branch the
    /// original server runs, not a single upsert.
    async fn persist(&self, entry: &WorkerNameEntry) -> Result<(), sqlx::Error> {
        let uid = entry.user_id as i64;
        let group_id = -uid;

        let existing = sqlx::query(
            "SELECT group_id, worker_name FROM mining_workers WHERE uid = ? AND worker_id = ?",
        )
        .bind(uid)
        .bind(entry.worker_id)
        .fetch_optional(&self.pool)
        .await?;

        match existing {
            Some(row) => {
                let existing_group_id: i64 = row.try_get("group_id")?;
                let existing_worker_name: Option<String> = row.try_get("worker_name")?;
                let needs_update = existing_group_id == 0
                    || existing_worker_name.as_deref().unwrap_or("").is_empty();

                if needs_update {
                    sqlx::query(
                        "UPDATE mining_workers SET group_id = ?, worker_name = ?, updated_at = NOW() \
                         WHERE uid = ? AND worker_id = ?",
                    )
                    .bind(group_id)
                    .bind(&entry.worker_name)
                    .bind(uid)
                    .bind(entry.worker_id)
                    .execute(&self.pool)
                    .await?;
                }
                // else: row already belongs to a live group and has a name, nothing to do.
            }
            None => {
                sqlx::query(
                    "INSERT INTO mining_workers (uid, worker_id, group_id, worker_name, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, NOW(), NOW()) \
                     ON DUPLICATE KEY UPDATE worker_name = ?, updated_at = NOW()",
                )
                .bind(uid)
                .bind(entry.worker_id)
                .bind(group_id)
                .bind(&entry.worker_name)
                .bind(&entry.worker_name)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }
}
