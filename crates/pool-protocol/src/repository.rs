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

//! Owns the bounded window of currently-valid jobs, their fresh/stale lifecycle, and the
//! `mining.notify` scheduler. The mapping is guarded by a single, synchronous mutex; no session
//! I/O (the Broadcaster's job) ever runs while it is held.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use pool_bitcoin::DHash;
use pool_logging::macros::*;

use crate::error::IngestRejection;
use crate::job::{ExtendedJob, StratumJob};
use crate::notify::Broadcaster;

/// How long a job is kept in the window before `tryCleanExpiredJobs` evicts it.
pub const MAX_JOBS_LIFETIME_SECS: u32 = 300;
/// Minimum spacing between periodic `mining.notify` rebroadcasts of an unchanged head job.
pub const NOTIFY_INTERVAL_SECS: u32 = 30;
/// A job minted more than this many seconds before it arrives indicates the bus consumer has
/// fallen dangerously far behind.
pub const MAX_ARRIVAL_LAG_SECS: u32 = 60;

const _: () = assert!(NOTIFY_INTERVAL_SECS < MAX_JOBS_LIFETIME_SECS);

pub fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before the Unix epoch")
        .as_secs() as u32
}

#[derive(Debug, Clone, Copy)]
pub struct IngestOutcome {
    pub is_clean: bool,
    pub fast_follow_broadcast: bool,
}

struct RepositoryState {
    jobs: BTreeMap<u64, Arc<ExtendedJob>>,
    latest_prev_hash: DHash,
    last_job_send_time: u32,
    last_job_id: Option<u64>,
}

impl RepositoryState {
    fn new() -> Self {
        Self {
            jobs: BTreeMap::new(),
            latest_prev_hash: DHash::zero(),
            last_job_send_time: 0,
            last_job_id: None,
        }
    }
}

pub struct JobRepository {
    state: Mutex<RepositoryState>,
    broadcaster: Arc<Broadcaster>,
}

impl JobRepository {
    pub fn new(broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            state: Mutex::new(RepositoryState::new()),
            broadcaster,
        }
    }

    pub fn get_latest(&self) -> Option<Arc<ExtendedJob>> {
        self.state
            .lock()
            .expect("job repository lock")
            .jobs
            .values()
            .next_back()
            .cloned()
    }

    pub fn get(&self, job_id: u64) -> Option<Arc<ExtendedJob>> {
        self.state
            .lock()
            .expect("job repository lock")
            .jobs
            .get(&job_id)
            .cloned()
    }

    pub fn job_count(&self) -> usize {
        self.state.lock().expect("job repository lock").jobs.len()
    }

    /// Inserts a freshly-ingested job. See SPEC_FULL.md REDESIGN FLAGS: duplicate ids and
    /// excessive arrival lag are rejected (and logged by the caller), not fatal.
    pub fn ingest(&self, job: StratumJob, now: u32) -> Result<IngestOutcome, IngestRejection> {
        let job_id = job.job_id;
        let mint_time = job.mint_time();

        if mint_time + MAX_ARRIVAL_LAG_SECS < now {
            return Err(IngestRejection::ExcessiveArrivalLag {
                job_id,
                mint_time,
                now,
            });
        }

        let (extended, is_clean, to_broadcast) = {
            let mut state = self.state.lock().expect("job repository lock");

            if state.jobs.contains_key(&job_id) {
                return Err(IngestRejection::DuplicateJobId { job_id });
            }

            let is_clean = job.prev_hash != state.latest_prev_hash;
            let branch_is_empty = job.merkle_branch.is_empty();
            // "the previous insertion was a clean job whose merkleBranch was empty": checks
            // only the immediately-preceding map entry (StratumServer.cc), not "the last clean
            // job" seen at any point in the past, so an intervening non-clean, non-matching
            // insertion does not leave a stale fast-follow armed for a later, unrelated job.
            let previous_was_clean_and_empty = state.jobs.values().next_back().is_some_and(
                |previous| previous.is_clean() && previous.job().merkle_branch.is_empty(),
            );
            let fast_follow = !is_clean && previous_was_clean_and_empty && !branch_is_empty;

            if is_clean {
                state.latest_prev_hash = job.prev_hash;
            }

            let extended = Arc::new(ExtendedJob::new(job, is_clean));

            if is_clean {
                // All prior jobs transition to STALE atomically with insertion, before any
                // broadcast can observe the new head.
                for existing in state.jobs.values() {
                    existing.mark_stale();
                }
            }
            state.jobs.insert(job_id, extended.clone());

            let to_broadcast = is_clean || fast_follow;
            if to_broadcast {
                state.last_job_id = Some(job_id);
                state.last_job_send_time = now;
            }

            (extended, is_clean, to_broadcast)
        };

        if to_broadcast {
            self.broadcaster.broadcast(&extended);
        }

        Ok(IngestOutcome {
            is_clean,
            fast_follow_broadcast: to_broadcast && !is_clean,
        })
    }

    /// Used by the Share Validator when a submitted share solves a block.
    pub fn mark_all_stale(&self) {
        let state = self.state.lock().expect("job repository lock");
        for job in state.jobs.values() {
            job.mark_stale();
        }
    }

    /// Runs both periodic maintenance tasks; piggy-backed onto the Ingestor's poll loop so no
    /// separate timer thread is required.
    pub fn tick(&self, now: u32) {
        self.check_and_send_mining_notify(now);
        self.try_clean_expired_jobs(now);
    }

    /// Rebroadcasts the head job if `NotifyInterval` has elapsed, deduplicating against the
    /// previous broadcast's job id.
    pub fn check_and_send_mining_notify(&self, now: u32) {
        let to_broadcast = {
            let mut state = self.state.lock().expect("job repository lock");

            let Some(head) = state.jobs.values().next_back().cloned() else {
                return;
            };

            if now < state.last_job_send_time + NOTIFY_INTERVAL_SECS {
                return;
            }

            let repeat = state.last_job_id == Some(head.job_id());
            state.last_job_id = Some(head.job_id());
            state.last_job_send_time = now;

            if repeat {
                None
            } else {
                Some(head)
            }
        };

        if let Some(head) = to_broadcast {
            self.broadcaster.broadcast(&head);
        }
    }

    /// Evicts jobs whose mint-time is older than `MaxJobsLifetime`. Scans from the smallest
    /// `job_id` upward and stops at the first non-expired entry, since `job_id` ordering implies
    /// mint-time ordering. Keys and mint-times are captured before the entry is erased so the
    /// post-eviction log line never reads from an invalidated map entry.
    pub fn try_clean_expired_jobs(&self, now: u32) {
        let cutoff = now.saturating_sub(MAX_JOBS_LIFETIME_SECS);

        let evicted: Vec<(u64, u32)> = {
            let mut state = self.state.lock().expect("job repository lock");
            let mut evicted = Vec::new();

            loop {
                let Some((&job_id, job)) = state.jobs.iter().next() else {
                    break;
                };
                let mint_time = job.job().mint_time();
                if mint_time >= cutoff {
                    break;
                }
                evicted.push((job_id, mint_time));
                state.jobs.remove(&job_id);
            }

            evicted
        };

        for (job_id, mint_time) in evicted {
            info!("evicted expired job"; "job_id" => job_id, "mint_time" => mint_time);
        }
    }
}
