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

//! Thin producers for the two outbound buses. The payload format is owned by a collaborator
//! (the downstream share-accounting service); this module only forwards the bytes it is handed.

use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::producer::{BaseProducer, BaseRecord, Producer as _};

use pool_logging::macros::*;

use crate::error::FatalError;

/// Both "ShareLog" and "SolvedShare" hash onto partition "unassigned" broker-side, so the
/// producer never needs to pick a partition explicitly.
const UNASSIGNED_PARTITION_KEY: &str = "unassigned";

pub struct ShareBuses {
    producer: BaseProducer,
    share_log_topic: String,
    solved_share_topic: String,
}

impl ShareBuses {
    pub fn new(brokers: &str, share_log_topic: &str, solved_share_topic: &str) -> Result<Self, FatalError> {
        let producer: BaseProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .create()
            .map_err(|source| FatalError::ProducerSetupFailed {
                topic: "ShareLog",
                source,
            })?;

        Ok(Self {
            producer,
            share_log_topic: share_log_topic.to_string(),
            solved_share_topic: solved_share_topic.to_string(),
        })
    }

    pub fn publish_share(&self, payload: &[u8]) {
        self.publish(&self.share_log_topic, payload);
    }

    pub fn publish_solved_share(&self, payload: &[u8]) {
        self.publish(&self.solved_share_topic, payload);
    }

    fn publish(&self, topic: &str, payload: &[u8]) {
        let record = BaseRecord::to(topic)
            .payload(payload)
            .key(UNASSIGNED_PARTITION_KEY);

        if let Err((err, _)) = self.producer.send(record) {
            warn!("failed to enqueue bus record"; "topic" => topic, "error" => %err);
        }
        // Give librdkafka's background thread a chance to drain the local queue without
        // blocking the caller's hot path.
        self.producer.poll(Duration::from_millis(0));
    }
}
