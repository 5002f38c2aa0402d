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

//! Fans a `mining.notify` announcement out to every connected miner session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use pool_logging::macros::*;

use crate::job::ExtendedJob;

/// Opaque per-connection send target. The reactor's session implementation is the only thing
/// that knows how a notify string actually reaches a socket; the Broadcaster just calls this.
pub trait NotifySink: Send + Sync {
    fn send_mining_notify(&self, job: &ExtendedJob);
}

pub type SessionId = u64;

/// Fans a job out to every registered session. Individual session failures are best-effort: one
/// misbehaving session never aborts the broadcast to the rest of the fleet.
#[derive(Default)]
pub struct Broadcaster {
    sessions: Mutex<HashMap<SessionId, Arc<dyn NotifySink>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: SessionId, sink: Arc<dyn NotifySink>) {
        self.sessions.lock().expect("session map lock").insert(id, sink);
    }

    pub fn unregister(&self, id: SessionId) {
        self.sessions.lock().expect("session map lock").remove(&id);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().expect("session map lock").len()
    }

    /// Broadcasts `job` to every currently-connected session. The session map lock is held only
    /// long enough to snapshot the `Arc<dyn NotifySink>` handles; no session I/O runs under it.
    pub fn broadcast(&self, job: &ExtendedJob) {
        let sinks: Vec<Arc<dyn NotifySink>> = self
            .sessions
            .lock()
            .expect("session map lock")
            .values()
            .cloned()
            .collect();

        debug!("broadcasting mining.notify"; "job_id" => job.job_id(), "sessions" => sinks.len());

        for sink in sinks {
            sink.send_mining_notify(job);
        }
    }
}
