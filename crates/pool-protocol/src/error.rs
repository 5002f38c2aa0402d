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

use thiserror::Error;

/// A job insertion the Repository refused. Both variants were treated as fatal-process-abort
/// conditions in the original pool server; here they are recoverable (see REDESIGN FLAGS in
/// SPEC_FULL.md) — the Ingestor logs this at `error!` and drops the record.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IngestRejection {
    #[error("job {job_id} was already present in the window")]
    DuplicateJobId { job_id: u64 },

    #[error("job {job_id} minted at {mint_time} arrived too late (now={now}, max lag=60s)")]
    ExcessiveArrivalLag {
        job_id: u64,
        mint_time: u32,
        now: u32,
    },
}

/// Miner-facing share classification. `NoError` is itself a member rather than the `Ok` side of
/// a `Result`, matching the wire protocol's single "error" slot in a submit reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareError {
    JobNotFound,
    TimeTooOld,
    TimeTooNew,
    LowDifficulty,
    NoError,
}

impl std::fmt::Display for ShareError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = match self {
            ShareError::JobNotFound => "JOB_NOT_FOUND",
            ShareError::TimeTooOld => "TIME_TOO_OLD",
            ShareError::TimeTooNew => "TIME_TOO_NEW",
            ShareError::LowDifficulty => "LOW_DIFFICULTY",
            ShareError::NoError => "NO_ERROR",
        };
        f.write_str(token)
    }
}

impl ShareError {
    pub fn is_accepted(self) -> bool {
        matches!(self, ShareError::NoError)
    }
}
