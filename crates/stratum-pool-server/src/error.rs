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

//! Errors that abort the whole process, per §7's Fatal taxonomy: an unknown bus topic/partition,
//! failure to bind the listening socket, or failure to stand up the bus producers at start-up.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FatalError {
    #[error("bus topic or partition unavailable: {0}")]
    UnknownTopicOrPartition(#[source] rdkafka::error::KafkaError),

    #[error("could not bind Stratum listening socket on {addr}: {source}")]
    BindFailed {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("could not set up bus producer for topic {topic}: {source}")]
    ProducerSetupFailed {
        topic: &'static str,
        #[source]
        source: rdkafka::error::KafkaError,
    },
}
