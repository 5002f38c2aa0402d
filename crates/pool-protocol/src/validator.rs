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

//! Validates a submitted share against its referenced job: reconstructs the candidate block
//! header, hashes it, and classifies the result.

use std::sync::Arc;

use pool_bitcoin::{Header, Target};
use pool_logging::macros::*;
use thiserror::Error;

use crate::error::ShareError;
use crate::repository::JobRepository;

/// The time window, in seconds past a job's `nTime`, beyond which a submission is rejected as
/// `TIME_TOO_NEW`.
pub const MAX_NTIME_FUTURE_SECS: u32 = 600;

#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("invalid extraNonce2 hex: {0}")]
    InvalidExtraNonce2Hex(#[from] hex::FromHexError),
    #[error("invalid coinbase hex in job")]
    InvalidCoinbaseHex(hex::FromHexError),
}

#[derive(Debug, Clone, Copy)]
pub struct ShareOutcome {
    pub verdict: ShareError,
    /// `true` if the reconstructed header's hash met the job's network target, i.e. this share
    /// solved a block. A solved share still carries a `verdict` classifying it against the
    /// per-session job target, as specified ("Continue to classification by jobTarget").
    pub solved: bool,
}

pub struct Submission<'a> {
    pub job_id: u64,
    pub extra_nonce1: u32,
    pub extra_nonce2_hex: &'a str,
    pub n_time: u32,
    pub nonce: u32,
    pub job_target: Target,
    pub work_full_name: &'a str,
}

pub struct ShareValidator {
    repository: Arc<JobRepository>,
}

impl ShareValidator {
    pub fn new(repository: Arc<JobRepository>) -> Self {
        Self { repository }
    }

    pub fn check_share(&self, submission: &Submission<'_>) -> Result<ShareOutcome, ValidatorError> {
        let Some(job) = self.repository.get(submission.job_id) else {
            return Ok(ShareOutcome {
                verdict: ShareError::JobNotFound,
                solved: false,
            });
        };

        if job.is_stale() {
            return Ok(ShareOutcome {
                verdict: ShareError::JobNotFound,
                solved: false,
            });
        }

        let stratum_job = job.job();

        if submission.n_time <= stratum_job.min_time {
            return Ok(ShareOutcome {
                verdict: ShareError::TimeTooOld,
                solved: false,
            });
        }
        if submission.n_time > stratum_job.n_time + MAX_NTIME_FUTURE_SECS {
            return Ok(ShareOutcome {
                verdict: ShareError::TimeTooNew,
                solved: false,
            });
        }

        let coinbase1 = hex::decode(&stratum_job.coinbase1)
            .map_err(ValidatorError::InvalidCoinbaseHex)?;
        let coinbase2 = hex::decode(&stratum_job.coinbase2)
            .map_err(ValidatorError::InvalidCoinbaseHex)?;
        let extra_nonce2 = hex::decode(submission.extra_nonce2_hex)?;

        let mut coinbase =
            Vec::with_capacity(coinbase1.len() + 4 + extra_nonce2.len() + coinbase2.len());
        coinbase.extend_from_slice(&coinbase1);
        coinbase.extend_from_slice(&submission.extra_nonce1.to_be_bytes());
        coinbase.extend_from_slice(&extra_nonce2);
        coinbase.extend_from_slice(&coinbase2);

        let merkle_root = pool_bitcoin::merkle_root(&coinbase, &stratum_job.merkle_branch);

        let header = Header {
            version: stratum_job.n_version,
            prev_hash: stratum_job.prev_hash,
            merkle_root,
            time: submission.n_time,
            bits: stratum_job.n_bits,
            nonce: submission.nonce,
        };

        let block_hash = header.block_hash();
        let hash_as_target = block_hash.into_target_le();

        let solved = stratum_job.network_target.is_met_by(hash_as_target);
        if solved {
            info!("block solved";
                "work" => submission.work_full_name,
                "job_id" => submission.job_id,
                "hash" => format!("{}", block_hash));
            self.repository.mark_all_stale();
        }

        if stratum_job.network_target.is_met_by(hash_as_target.shr(10)) {
            debug!("high-diff share within 2^10 of network target";
                "work" => submission.work_full_name,
                "job_id" => submission.job_id);
        }

        let verdict = if !submission.job_target.is_met_by(hash_as_target) {
            ShareError::LowDifficulty
        } else {
            ShareError::NoError
        };

        Ok(ShareOutcome { verdict, solved })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::job::StratumJob;
    use crate::notify::Broadcaster;
    use pool_bitcoin::DHash;

    fn repo_with_job(min_time: u32, n_time: u32, job_target: Target) -> (Arc<JobRepository>, u64) {
        let repo = Arc::new(JobRepository::new(Arc::new(Broadcaster::new())));
        let job_id = (1000u64 << 32) | 1;
        let job = StratumJob {
            job_id,
            prev_hash: DHash::hash(b"prev"),
            prev_hash_be_str: String::new(),
            coinbase1: hex::encode(b"coinbase-prefix-"),
            coinbase2: hex::encode(b"-coinbase-suffix"),
            merkle_branch: vec![],
            n_version: 0x20000000,
            n_bits: 0x1d00ffff,
            n_time,
            min_time,
            // Easiest possible target so "NO_ERROR" and "solved" are both reachable from tests
            // without brute-forcing a real proof of work.
            network_target: job_target,
            height: 1,
        };
        repo.ingest(job, 1000).unwrap();
        (repo, job_id)
    }

    #[test]
    fn unknown_job_id_is_job_not_found() {
        let (repo, _) = repo_with_job(0, 100, Target::MAX);
        let validator = ShareValidator::new(repo);

        let submission = Submission {
            job_id: 0xdead_beef,
            extra_nonce1: 0,
            extra_nonce2_hex: "00000000",
            n_time: 100,
            nonce: 0,
            job_target: Target::MAX,
            work_full_name: "worker.1",
        };

        let outcome = validator.check_share(&submission).unwrap();
        assert_eq!(outcome.verdict, ShareError::JobNotFound);
    }

    #[test]
    fn stale_job_is_job_not_found() {
        let (repo, job_id) = repo_with_job(0, 100, Target::MAX);
        repo.mark_all_stale();
        let validator = ShareValidator::new(repo);

        let submission = Submission {
            job_id,
            extra_nonce1: 0,
            extra_nonce2_hex: "00000000",
            n_time: 100,
            nonce: 0,
            job_target: Target::MAX,
            work_full_name: "worker.1",
        };

        let outcome = validator.check_share(&submission).unwrap();
        assert_eq!(outcome.verdict, ShareError::JobNotFound);
    }

    #[test]
    fn scenario_5_time_too_old_then_accepted() {
        let (repo, job_id) = repo_with_job(100, 100, Target::MAX);
        let validator = ShareValidator::new(repo);

        let too_old = Submission {
            job_id,
            extra_nonce1: 0,
            extra_nonce2_hex: "00000000",
            n_time: 100,
            nonce: 0,
            job_target: Target::MAX,
            work_full_name: "worker.1",
        };
        assert_eq!(
            validator.check_share(&too_old).unwrap().verdict,
            ShareError::TimeTooOld
        );

        let accepted = Submission {
            job_id,
            extra_nonce1: 0,
            extra_nonce2_hex: "00000000",
            n_time: 101,
            nonce: 0,
            job_target: Target::MAX,
            work_full_name: "worker.1",
        };
        let outcome = validator.check_share(&accepted).unwrap();
        assert_eq!(outcome.verdict, ShareError::NoError);
        assert!(!outcome.solved);
    }

    #[test]
    fn time_too_new_is_rejected() {
        let (repo, job_id) = repo_with_job(0, 100, Target::MAX);
        let validator = ShareValidator::new(repo);

        let submission = Submission {
            job_id,
            extra_nonce1: 0,
            extra_nonce2_hex: "00000000",
            n_time: 100 + MAX_NTIME_FUTURE_SECS + 1,
            nonce: 0,
            job_target: Target::MAX,
            work_full_name: "worker.1",
        };

        assert_eq!(
            validator.check_share(&submission).unwrap().verdict,
            ShareError::TimeTooNew
        );
    }

    #[test]
    fn hash_above_job_target_is_low_difficulty() {
        // Target::default() is all-zero: no hash can ever meet it, so every share is rejected.
        let (repo, job_id) = repo_with_job(0, 100, Target::MAX);
        let validator = ShareValidator::new(repo);

        let submission = Submission {
            job_id,
            extra_nonce1: 0,
            extra_nonce2_hex: "00000000",
            n_time: 100,
            nonce: 0,
            job_target: Target::default(),
            work_full_name: "worker.1",
        };

        assert_eq!(
            validator.check_share(&submission).unwrap().verdict,
            ShareError::LowDifficulty
        );
    }

    #[test]
    fn scenario_6_block_solved_marks_all_jobs_stale() {
        // Target::MAX is met by any hash, so this share always "solves a block".
        let (repo, job_id) = repo_with_job(0, 100, Target::MAX);
        let validator = ShareValidator::new(repo.clone());

        let submission = Submission {
            job_id,
            extra_nonce1: 0,
            extra_nonce2_hex: "00000000",
            n_time: 100,
            nonce: 0,
            job_target: Target::MAX,
            work_full_name: "worker.1",
        };

        let outcome = validator.check_share(&submission).unwrap();
        assert!(outcome.solved);
        assert!(repo.get(job_id).unwrap().is_stale());

        // The next check_share against the now-stale job id sees JOB_NOT_FOUND.
        let after = validator.check_share(&submission).unwrap();
        assert_eq!(after.verdict, ShareError::JobNotFound);
    }

    #[test]
    fn invalid_extra_nonce2_hex_is_an_error_not_a_panic() {
        let (repo, job_id) = repo_with_job(0, 100, Target::MAX);
        let validator = ShareValidator::new(repo);

        let submission = Submission {
            job_id,
            extra_nonce1: 0,
            extra_nonce2_hex: "not-hex",
            n_time: 100,
            nonce: 0,
            job_target: Target::MAX,
            work_full_name: "worker.1",
        };

        assert!(validator.check_share(&submission).is_err());
    }
}
