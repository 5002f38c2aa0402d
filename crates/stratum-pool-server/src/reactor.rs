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

//! TCP reactor: accepts miner connections, speaks the Stratum v1 line-delimited JSON-RPC subset
//! needed to subscribe, authorize and submit shares, and forwards results to the buses.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;

use pool_logging::macros::*;
use pool_protocol::{
    Broadcaster, ExtendedJob, JobRepository, NotifySink, ShareError, ShareOutcome, ShareValidator,
    Submission,
};

use crate::buses::ShareBuses;
use crate::error::FatalError;
use crate::registry::{derive_worker_id, WorkerNameEntry};

/// A session's extraNonce1, assigned at `mining.subscribe` time and embedded in every coinbase
/// this session's shares reconstruct. 4 bytes, matching `Submission::extra_nonce1`.
fn next_extra_nonce1(counter: &AtomicU32) -> u32 {
    counter.fetch_add(1, Ordering::Relaxed)
}

/// Outbound line, queued onto the session's mpsc channel so a slow socket never blocks the
/// Broadcaster or another session's submit handling.
struct SessionHandle {
    sender: mpsc::UnboundedSender<String>,
}

impl NotifySink for SessionHandle {
    fn send_mining_notify(&self, job: &ExtendedJob) {
        // An error here means the session's writer task has already exited; the Broadcaster
        // doesn't need to know, the session will be unregistered by its own cleanup.
        let _ = self.sender.send(job.mining_notify().to_string());
    }
}

pub struct Reactor {
    listen_addr: SocketAddr,
    repository: Arc<JobRepository>,
    broadcaster: Arc<Broadcaster>,
    validator: Arc<ShareValidator>,
    buses: Arc<ShareBuses>,
    worker_name_queue: Arc<Mutex<std::collections::VecDeque<WorkerNameEntry>>>,
    names: Arc<tokio::sync::RwLock<HashMap<String, u64>>>,
    shutdown: CancellationToken,
    session_ids: AtomicU64,
    extra_nonce1s: AtomicU32,
}

impl Reactor {
    pub fn new(
        listen_addr: SocketAddr,
        repository: Arc<JobRepository>,
        broadcaster: Arc<Broadcaster>,
        validator: Arc<ShareValidator>,
        buses: Arc<ShareBuses>,
        worker_name_queue: Arc<Mutex<std::collections::VecDeque<WorkerNameEntry>>>,
        names: Arc<tokio::sync::RwLock<HashMap<String, u64>>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            listen_addr,
            repository,
            broadcaster,
            validator,
            buses,
            worker_name_queue,
            names,
            shutdown,
            session_ids: AtomicU64::new(1),
            extra_nonce1s: AtomicU32::new(1),
        }
    }

    pub async fn run(self: Arc<Self>) -> Result<(), FatalError> {
        let listener = TcpListener::bind(self.listen_addr)
            .await
            .map_err(|source| FatalError::BindFailed {
                addr: self.listen_addr,
                source,
            })?;

        info!("reactor listening"; "addr" => %self.listen_addr);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("reactor shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, peer_addr)) => {
                            let reactor = self.clone();
                            tokio::spawn(async move { reactor.handle_connection(socket, peer_addr).await });
                        }
                        Err(err) => {
                            warn!("accept failed"; "error" => %err);
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, socket: TcpStream, peer_addr: SocketAddr) {
        let session_id = self.session_ids.fetch_add(1, Ordering::Relaxed);
        let extra_nonce1 = next_extra_nonce1(&self.extra_nonce1s);

        let framed = Framed::new(socket, LinesCodec::new_with_max_length(8192));
        let (mut sink, mut stream) = framed.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        self.broadcaster
            .register(session_id, Arc::new(SessionHandle { sender: tx.clone() }));

        let writer = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if sink.send(line.trim_end().to_string()).await.is_err() {
                    break;
                }
            }
        });

        let mut session = Session {
            work_full_name: None,
            job_target: pool_bitcoin::Target::from_compact(0x1f00ffff),
        };

        while let Some(line) = stream.next().await {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    debug!("session line decode error"; "peer" => %peer_addr, "error" => %err);
                    break;
                }
            };

            match self.handle_line(&line, session_id, extra_nonce1, &tx, &mut session).await {
                Ok(()) => {}
                Err(err) => {
                    debug!("session request handling error"; "peer" => %peer_addr, "error" => %err);
                    break;
                }
            }
        }

        self.broadcaster.unregister(session_id);
        drop(tx);
        writer.abort();
        debug!("session closed"; "peer" => %peer_addr, "session_id" => session_id);
    }

    async fn handle_line(
        &self,
        line: &str,
        session_id: u64,
        extra_nonce1: u32,
        tx: &mpsc::UnboundedSender<String>,
        session: &mut Session,
    ) -> Result<(), serde_json::Error> {
        let request: Value = serde_json::from_str(line)?;
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let method = request.get("method").and_then(Value::as_str).unwrap_or("");
        let params = request.get("params").cloned().unwrap_or(Value::Array(vec![]));

        match method {
            "mining.subscribe" => {
                let response = serde_json::json!({
                    "id": id,
                    "result": [[["mining.set_difficulty", session_id.to_string()], ["mining.notify", session_id.to_string()]], format!("{:08x}", extra_nonce1), 4],
                    "error": Value::Null,
                });
                let _ = tx.send(response.to_string());

                if let Some(head) = self.repository.get_latest() {
                    let _ = tx.send(head.mining_notify().to_string());
                }
            }
            "mining.authorize" => {
                let full_name = params.get(0).and_then(Value::as_str).unwrap_or("").to_string();
                let authorized = self.authorize(&full_name).await;
                if authorized {
                    session.work_full_name = Some(full_name);
                }
                send_result(tx, &id, Value::Bool(authorized));
            }
            "mining.submit" => {
                let outcome = self.handle_submit(&params, extra_nonce1, session).await;
                self.reply_submit(tx, &id, outcome);
            }
            other => {
                debug!("unhandled stratum method"; "method" => other, "session_id" => session_id);
                send_error(tx, &id, -3, "Method not found");
            }
        }

        Ok(())
    }

    async fn authorize(&self, full_name: &str) -> bool {
        let account_name = full_name.split('.').next().unwrap_or(full_name);
        self.names.read().await.contains_key(account_name)
    }

    async fn handle_submit(&self, params: &Value, extra_nonce1: u32, session: &Session) -> SubmitResult {
        let Some(work_full_name) = session.work_full_name.clone() else {
            return SubmitResult::Rejected(ShareError::JobNotFound);
        };

        let job_id = match params
            .get(1)
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<u64>().ok())
        {
            Some(id) => id,
            None => return SubmitResult::Rejected(ShareError::JobNotFound),
        };
        let extra_nonce2_hex = params.get(2).and_then(Value::as_str).unwrap_or("").to_string();
        let n_time = match params.get(3).and_then(Value::as_str).and_then(|s| u32::from_str_radix(s, 16).ok()) {
            Some(v) => v,
            None => return SubmitResult::Rejected(ShareError::TimeTooOld),
        };
        let nonce = match params.get(4).and_then(Value::as_str).and_then(|s| u32::from_str_radix(s, 16).ok()) {
            Some(v) => v,
            None => return SubmitResult::Rejected(ShareError::TimeTooOld),
        };

        let submission = Submission {
            job_id,
            extra_nonce1,
            extra_nonce2_hex: &extra_nonce2_hex,
            n_time,
            nonce,
            job_target: session.job_target,
            work_full_name: &work_full_name,
        };

        match self.validator.check_share(&submission) {
            Ok(outcome) => {
                self.on_share_outcome(&outcome, &work_full_name, job_id).await;
                SubmitResult::Checked(outcome)
            }
            Err(err) => {
                warn!("share validation error"; "work" => %work_full_name, "error" => %err);
                SubmitResult::Rejected(ShareError::JobNotFound)
            }
        }
    }

    async fn on_share_outcome(&self, outcome: &ShareOutcome, work_full_name: &str, job_id: u64) {
        let record = ShareLogRecord {
            work_full_name,
            job_id,
            accepted: outcome.verdict.is_accepted(),
            verdict: outcome.verdict.to_string(),
        };
        if let Ok(payload) = serde_json::to_vec(&record) {
            self.buses.publish_share(&payload);
            if outcome.solved {
                self.buses.publish_solved_share(&payload);
            }
        }

        if outcome.verdict.is_accepted() {
            if let Some((account, worker)) = work_full_name.split_once('.') {
                if let Some(&user_id) = self.names.read().await.get(account) {
                    let mut queue = self.worker_name_queue.lock().expect("worker name queue poisoned");
                    queue.push_back(WorkerNameEntry {
                        user_id,
                        worker_id: derive_worker_id(worker),
                        worker_name: worker.to_string(),
                    });
                }
            }
        }
    }

    fn reply_submit(&self, tx: &mpsc::UnboundedSender<String>, id: &Value, outcome: SubmitResult) {
        match outcome {
            SubmitResult::Checked(outcome) if outcome.verdict.is_accepted() => {
                send_result(tx, id, Value::Bool(true));
            }
            SubmitResult::Checked(outcome) => {
                send_error(tx, id, 23, &outcome.verdict.to_string());
            }
            SubmitResult::Rejected(verdict) => {
                send_error(tx, id, 23, &verdict.to_string());
            }
        }
    }
}

struct Session {
    work_full_name: Option<String>,
    job_target: pool_bitcoin::Target,
}

enum SubmitResult {
    Checked(ShareOutcome),
    Rejected(ShareError),
}

#[derive(Serialize)]
struct ShareLogRecord<'a> {
    work_full_name: &'a str,
    job_id: u64,
    accepted: bool,
    verdict: String,
}

fn send_result(tx: &mpsc::UnboundedSender<String>, id: &Value, result: Value) {
    let response = serde_json::json!({ "id": id, "result": result, "error": Value::Null });
    let _ = tx.send(response.to_string());
}

fn send_error(tx: &mpsc::UnboundedSender<String>, id: &Value, code: i32, message: &str) {
    let response = serde_json::json!({
        "id": id,
        "result": Value::Null,
        "error": [code, message, Value::Null],
    });
    let _ = tx.send(response.to_string());
}
