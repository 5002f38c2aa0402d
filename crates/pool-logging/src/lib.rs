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

//! Process-wide logger shared by every crate in the workspace.
//!
//! Every other crate imports `pool_logging::macros::*` and calls `info!`/`warn!`/`error!`/
//! `debug!`/`trace!` with no logger argument, as `ii_logging::macros::*` is imported throughout
//! the teacher codebase. Under the hood this is `slog_scope`'s global-logger flavor of `slog`:
//! [`init`] installs a process-wide drain once, and the macros reach it through a thread-local
//! scope guard rather than threading a `Logger` handle through every function signature.

use slog::Drain;

fn build_root_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let term_drain = slog_term::FullFormat::new(decorator).build().fuse();
    let env_drain = slog_envlogger::new(term_drain);
    let async_drain = slog_async::Async::new(env_drain).build().fuse();
    slog::Logger::root(async_drain, slog::o!())
}

/// Installs the process-wide logger as the `slog_scope` global logger. Must be called once from
/// `main` before any `macros::*` call; returns a guard that resets the global logger (and flushes
/// the async drain) when dropped, so it should be held for the lifetime of `main`.
#[must_use = "dropping the guard immediately deinstalls the global logger"]
pub fn init() -> slog_scope::GlobalLoggerGuard {
    slog_scope::set_global_logger(build_root_logger())
}

/// Re-exports of the `slog_scope` leveled-logging macros, mirroring the way
/// `ii_logging::macros::*` is imported throughout the teacher codebase.
pub mod macros {
    pub use slog_scope::{debug, error, info, trace, warn};
}
