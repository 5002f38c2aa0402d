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

//! Black-box exercise of the Repository -> Broadcaster -> Validator pipeline, wired together the
//! way `main.rs` wires them, without any real network or bus I/O.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pool_bitcoin::{DHash, Target};
use pool_protocol::{Broadcaster, ExtendedJob, JobRepository, NotifySink, ShareError, ShareValidator, StratumJob, Submission};

struct CountingSink {
    notifies: AtomicUsize,
}

impl NotifySink for CountingSink {
    fn send_mining_notify(&self, _job: &ExtendedJob) {
        self.notifies.fetch_add(1, Ordering::SeqCst);
    }
}

fn job_id_at(mint_time: u32, nonce: u32) -> u64 {
    ((mint_time as u64) << 32) | nonce as u64
}

fn make_job(job_id: u64, prev_hash: DHash, n_time: u32, min_time: u32) -> StratumJob {
    StratumJob {
        job_id,
        prev_hash,
        prev_hash_be_str: prev_hash.to_be_hex(),
        coinbase1: hex::encode(b"coinbase-prefix-"),
        coinbase2: hex::encode(b"-coinbase-suffix"),
        merkle_branch: vec![],
        n_version: 0x20000000,
        n_bits: 0x1d00ffff,
        n_time,
        min_time,
        network_target: Target::MAX,
        height: 800_000,
    }
}

#[test]
fn a_new_clean_job_reaches_every_connected_session_and_then_validates_a_share() {
    let broadcaster = Arc::new(Broadcaster::new());
    let repository = Arc::new(JobRepository::new(broadcaster.clone()));
    let validator = ShareValidator::new(repository.clone());

    let sink = Arc::new(CountingSink { notifies: AtomicUsize::new(0) });
    broadcaster.register(1, sink.clone());

    let now = 1_000_000;
    let job_id = job_id_at(now, 1);
    let prev_hash = DHash::hash(b"tip");

    let outcome = repository
        .ingest(make_job(job_id, prev_hash, now, now - 10), now)
        .expect("fresh clean job is accepted");
    assert!(outcome.is_clean);
    assert_eq!(sink.notifies.load(Ordering::SeqCst), 1);

    let submission = Submission {
        job_id,
        extra_nonce1: 7,
        extra_nonce2_hex: "deadbeef",
        n_time: now,
        nonce: 42,
        job_target: Target::MAX,
        work_full_name: "alice.rig1",
    };

    let share = validator.check_share(&submission).expect("share validates");
    assert_eq!(share.verdict, ShareError::NoError);
    assert!(share.solved, "Target::MAX is met by any hash");

    // Solving a block marks every job (including the one just solved) stale; a resubmission of
    // the same share now reports JOB_NOT_FOUND instead of re-validating.
    let resubmit = validator.check_share(&submission).expect("resubmit does not error");
    assert_eq!(resubmit.verdict, ShareError::JobNotFound);
}

#[test]
fn a_second_job_on_the_same_tip_fast_follows_without_marking_the_head_stale() {
    let broadcaster = Arc::new(Broadcaster::new());
    let repository = Arc::new(JobRepository::new(broadcaster));

    let now = 2_000_000;
    let prev_hash = DHash::hash(b"tip-2");
    let empty_job = job_id_at(now, 1);
    let populated_job = job_id_at(now, 2);

    repository
        .ingest(make_job(empty_job, prev_hash, now, now - 10), now)
        .unwrap();

    let mut populated = make_job(populated_job, prev_hash, now, now - 10);
    populated.merkle_branch = vec![DHash::hash(b"tx-1")];
    let outcome = repository.ingest(populated, now).unwrap();

    assert!(!outcome.is_clean);
    assert!(outcome.fast_follow_broadcast);
    assert!(!repository.get(empty_job).unwrap().is_stale());
}

#[test]
fn duplicate_job_id_is_rejected_and_the_repository_keeps_serving() {
    let broadcaster = Arc::new(Broadcaster::new());
    let repository = Arc::new(JobRepository::new(broadcaster));

    let now = 3_000_000;
    let job_id = job_id_at(now, 1);
    let prev_hash = DHash::hash(b"tip-3");

    repository.ingest(make_job(job_id, prev_hash, now, now - 10), now).unwrap();
    let result = repository.ingest(make_job(job_id, prev_hash, now, now - 10), now);

    assert!(result.is_err());
    assert!(repository.get_latest().is_some());
}

#[test]
fn a_share_against_an_unknown_job_id_is_job_not_found() {
    let broadcaster = Arc::new(Broadcaster::new());
    let repository = Arc::new(JobRepository::new(broadcaster));
    let validator = ShareValidator::new(repository);

    let submission = Submission {
        job_id: 0x1234_5678_9abc_def0,
        extra_nonce1: 1,
        extra_nonce2_hex: "00000000",
        n_time: 100,
        nonce: 0,
        job_target: Target::MAX,
        work_full_name: "bob.worker",
    };

    let outcome = validator.check_share(&submission).unwrap();
    assert_eq!(outcome.verdict, ShareError::JobNotFound);
    assert!(!outcome.solved);
}
