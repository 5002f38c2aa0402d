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

//! Job lifecycle, `mining.notify` scheduling and share validation — the hard part of a Stratum
//! pool server.

pub mod error;
pub mod job;
pub mod notify;
pub mod repository;
pub mod validator;

pub use error::{IngestRejection, ShareError};
pub use job::{ExtendedJob, JobState, StratumJob};
pub use notify::{Broadcaster, NotifySink, SessionId};
pub use repository::{unix_now, IngestOutcome, JobRepository};
pub use validator::{ShareOutcome, ShareValidator, Submission, ValidatorError};
