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

//! Bitcoin-compatible primitives needed by a Stratum pool: double-SHA256 hashing, merkle root
//! folding, compact-bits/target conversion and 80-byte header serialization.

pub mod hash;
pub mod header;
pub mod target;

pub use hash::{merkle_root, DHash};
pub use header::Header;
pub use target::Target;
