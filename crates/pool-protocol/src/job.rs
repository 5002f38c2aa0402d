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

//! `StratumJob` (the immutable record from the bus) and `ExtendedJob` (the Repository's owned,
//! stateful wrapper around it).

use std::sync::atomic::{AtomicU8, Ordering};

use pool_bitcoin::{DHash, Target};
use serde::{Deserialize, Serialize};

/// An immutable block template emitted onto the "StratumJob" bus topic by the upstream producer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StratumJob {
    pub job_id: u64,
    pub prev_hash: DHash,
    pub prev_hash_be_str: String,
    pub coinbase1: String,
    pub coinbase2: String,
    pub merkle_branch: Vec<DHash>,
    pub n_version: u32,
    pub n_bits: u32,
    pub n_time: u32,
    pub min_time: u32,
    pub network_target: Target,
    pub height: u64,
}

impl StratumJob {
    /// High 32 bits of `job_id`: the Unix timestamp at which the job was minted.
    pub fn mint_time(&self) -> u32 {
        (self.job_id >> 32) as u32
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum JobState {
    Mining = 0,
    Stale = 1,
}

/// The Repository's owned wrapper around a `StratumJob`. `ExtendedJob` is the sole owner of its
/// `StratumJob` (no aliasing, per the Design Notes); `state` is the only field that mutates after
/// construction, and it only ever moves `Mining -> Stale`.
#[derive(Debug)]
pub struct ExtendedJob {
    job: StratumJob,
    is_clean: bool,
    state: AtomicU8,
    mining_notify: String,
}

impl ExtendedJob {
    pub fn new(job: StratumJob, is_clean: bool) -> Self {
        let mining_notify = build_mining_notify(&job, is_clean);
        Self {
            job,
            is_clean,
            state: AtomicU8::new(JobState::Mining as u8),
            mining_notify,
        }
    }

    pub fn job_id(&self) -> u64 {
        self.job.job_id
    }

    pub fn job(&self) -> &StratumJob {
        &self.job
    }

    pub fn is_clean(&self) -> bool {
        self.is_clean
    }

    pub fn state(&self) -> JobState {
        match self.state.load(Ordering::Acquire) {
            0 => JobState::Mining,
            _ => JobState::Stale,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.state() == JobState::Stale
    }

    pub fn mark_stale(&self) {
        self.state.store(JobState::Stale as u8, Ordering::Release);
    }

    /// The precomputed `mining.notify` announcement, newline-terminated and ready to write to a
    /// session's socket.
    pub fn mining_notify(&self) -> &str {
        &self.mining_notify
    }
}

/// Builds the `mining.notify` announcement string once, at `ExtendedJob` construction time.
fn build_mining_notify(job: &StratumJob, is_clean: bool) -> String {
    let merkle_branch: Vec<String> = job
        .merkle_branch
        .iter()
        .map(|step| hex::encode(step.as_bytes()))
        .collect();

    let params = serde_json::json!([
        job.job_id.to_string(),
        job.prev_hash_be_str,
        job.coinbase1,
        job.coinbase2,
        merkle_branch,
        format!("{:08x}", job.n_version),
        format!("{:08x}", job.n_bits),
        format!("{:08x}", job.n_time),
        is_clean,
    ]);

    let document = serde_json::json!({
        "id": serde_json::Value::Null,
        "method": "mining.notify",
        "params": params,
    });

    let mut line = document.to_string();
    line.push('\n');
    line
}
