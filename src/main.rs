#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::Parser;
use tunnelgate::config::Cli;
use tunnelgate::{client, metrics::Metrics, runtime, server, shutdown};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let worker_threads = runtime::get_container_cpu_limit();
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let _log_guard = tunnelgate::logging::init(cli.log_format);
    let metrics = Metrics::install();

    if cli.server {
        let config = cli.server_config()?;
        tokio::select! {
            result = server::run(config, metrics) => result,
            _ = shutdown::wait_for_signal() => Ok(()),
        }
    } else {
        let config = cli.client_config()?;
        tokio::select! {
            result = client::run(config, metrics) => result,
            _ = shutdown::wait_for_signal() => Ok(()),
        }
    }
}
