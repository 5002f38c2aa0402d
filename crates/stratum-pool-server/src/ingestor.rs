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

//! Consumes serialized `StratumJob` records from the "StratumJob" bus topic, starting from the
//! tail offset, and hands them to the Job Repository. Runs as a dedicated blocking thread: the
//! consumer's `poll()` itself blocks up to 1000 ms, so there is no benefit to running it on the
//! async reactor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message as _;
use rdkafka::{Offset, TopicPartitionList};

use pool_logging::macros::*;
use pool_protocol::{unix_now, JobRepository, StratumJob};

use crate::error::FatalError;

const POLL_TIMEOUT: Duration = Duration::from_millis(1000);

pub struct JobIngestor {
    consumer: BaseConsumer,
    repository: Arc<JobRepository>,
    running: Arc<AtomicBool>,
}

impl JobIngestor {
    pub fn new(
        brokers: &str,
        group_id: &str,
        topic: &str,
        repository: Arc<JobRepository>,
        running: Arc<AtomicBool>,
    ) -> Result<Self, FatalError> {
        let consumer: BaseConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.partition.eof", "true")
            .create()
            .map_err(FatalError::UnknownTopicOrPartition)?;

        let mut assignment = TopicPartitionList::new();
        assignment
            .add_partition_offset(topic, 0, Offset::OffsetTail(1))
            .map_err(FatalError::UnknownTopicOrPartition)?;
        consumer
            .assign(&assignment)
            .map_err(FatalError::UnknownTopicOrPartition)?;

        Ok(Self {
            consumer,
            repository,
            running,
        })
    }

    /// Runs the poll loop until `running` is cleared. Returns `Err` only for the Fatal bus
    /// conditions in §7 (unknown topic/partition); every other bus error is logged and retried.
    pub fn run(&self) -> Result<(), FatalError> {
        while self.running.load(Ordering::Acquire) {
            match self.consumer.poll(POLL_TIMEOUT) {
                None => {}
                Some(Err(KafkaError::PartitionEOF(_))) => {
                    // End-of-partition indications carry no data; ignored per spec.
                }
                Some(Err(err)) => {
                    if is_fatal(&err) {
                        return Err(FatalError::UnknownTopicOrPartition(err));
                    }
                    warn!("bus error while polling StratumJob"; "error" => %err);
                }
                Some(Ok(message)) => self.handle_message(message.payload()),
            }

            let now = unix_now();
            self.repository.tick(now);
        }

        Ok(())
    }

    fn handle_message(&self, payload: Option<&[u8]>) {
        let Some(payload) = payload else {
            warn!("StratumJob record had no payload");
            return;
        };

        let job: StratumJob = match serde_json::from_slice(payload) {
            Ok(job) => job,
            Err(err) => {
                warn!("failed to decode StratumJob record"; "error" => %err);
                return;
            }
        };

        let job_id = job.job_id;
        match self.repository.ingest(job, unix_now()) {
            Ok(outcome) => {
                debug!("ingested job"; "job_id" => job_id, "is_clean" => outcome.is_clean);
            }
            Err(rejection) => {
                error!("job rejected"; "job_id" => job_id, "reason" => %rejection);
            }
        }
    }
}

fn is_fatal(err: &KafkaError) -> bool {
    use rdkafka::error::RDKafkaErrorCode;

    matches!(
        err.rdkafka_error_code(),
        Some(RDKafkaErrorCode::UnknownTopic)
            | Some(RDKafkaErrorCode::UnknownPartition)
            | Some(RDKafkaErrorCode::UnknownTopicOrPartition)
    )
}
