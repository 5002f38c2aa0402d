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

mod buses;
mod config;
mod error;
mod ingestor;
mod reactor;
mod registry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use sqlx::mysql::MySqlPoolOptions;
use tokio_util::sync::CancellationToken;

use pool_logging::macros::*;
use pool_protocol::{Broadcaster, JobRepository, ShareValidator};

use buses::ShareBuses;
use config::Config;
use ingestor::JobIngestor;
use reactor::Reactor;
use registry::{UserRegistry, WorkerNameWriter};

fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    let _logger_guard = pool_logging::init();

    info!("starting stratum-pool-server"; "listen_addr" => %config.listen_addr);

    let running = Arc::new(AtomicBool::new(true));
    let shutdown = CancellationToken::new();
    {
        let running = running.clone();
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            warn!("shutdown signal received");
            running.store(false, Ordering::Release);
            shutdown.cancel();
        })?;
    }

    let broadcaster = Arc::new(Broadcaster::new());
    let repository = Arc::new(JobRepository::new(broadcaster.clone()));
    let validator = Arc::new(ShareValidator::new(repository.clone()));

    let buses = Arc::new(ShareBuses::new(
        &config.bus_brokers,
        &config.share_log_topic,
        &config.solved_share_topic,
    )?);

    // The Job Ingestor's `poll()` blocks the calling thread for up to a second at a time, so it
    // runs on its own OS thread rather than competing for the async runtime's executor slots.
    let ingestor_handle = {
        let ingestor = JobIngestor::new(
            &config.bus_brokers,
            &config.bus_group_id,
            &config.job_topic,
            repository.clone(),
            running.clone(),
        )?;
        std::thread::Builder::new()
            .name("job-ingestor".into())
            .spawn(move || {
                if let Err(err) = ingestor.run() {
                    error!("job ingestor exited fatally"; "error" => %err);
                    std::process::exit(1);
                }
            })?
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let db_pool = MySqlPoolOptions::new()
            .max_connections(4)
            .connect(&config.database_url)
            .await?;

        let user_registry = Arc::new(UserRegistry::new(config.user_list_url.clone()));
        let worker_name_writer = Arc::new(WorkerNameWriter::new(db_pool));

        info!("catching up user registry before accepting connections");
        user_registry.catch_up().await;

        let reactor = Arc::new(Reactor::new(
            config.listen_addr,
            repository.clone(),
            broadcaster.clone(),
            validator.clone(),
            buses.clone(),
            worker_name_writer.queue(),
            user_registry.names(),
            shutdown.clone(),
        ));

        let reactor_task = tokio::spawn(reactor.run());
        let registry_refresh_task = tokio::spawn({
            let user_registry = user_registry.clone();
            let shutdown = shutdown.clone();
            async move { user_registry.run(shutdown).await }
        });
        let worker_writer_task = tokio::spawn({
            let worker_name_writer = worker_name_writer.clone();
            let shutdown = shutdown.clone();
            async move { worker_name_writer.run(shutdown).await }
        });

        tokio::select! {
            result = reactor_task => {
                if let Ok(Err(err)) = result {
                    error!("reactor exited fatally"; "error" => %err);
                    std::process::exit(1);
                }
            }
            _ = registry_refresh_task => {}
            _ = worker_writer_task => {}
        }

        Ok::<(), anyhow::Error>(())
    })?;

    running.store(false, Ordering::Release);
    if ingestor_handle.join().is_err() {
        error!("job ingestor thread panicked");
    }

    Ok(())
}
