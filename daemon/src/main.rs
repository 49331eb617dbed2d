use anyhow::Context;
use clap::Parser;
use log::{error, info};
use std::{path::PathBuf, sync::Arc};
use vela_common::{config::VERSION, crypto::KeyVault};
use vela_daemon::{
    config::Config,
    core::{evm::NullVm, Core},
    p2p::P2pServer,
};

#[derive(Parser)]
#[command(name = "vela_daemon", version = VERSION, about = "Vela blockchain node")]
struct NodeArgs {
    /// Path to the node configuration file
    #[arg(long)]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        error!("Fatal: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = NodeArgs::parse();
    info!("Starting vela daemon v{}", VERSION);

    let config = Config::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;

    let vault = KeyVault::open(&config.keys.public_path, &config.keys.private_path)
        .context("opening the key vault")?;
    info!("Node address: {}", vault.address());

    let core = Core::new(&config, vault, Arc::new(NullVm)).context("starting the core")?;
    let p2p = P2pServer::start(core.clone(), &config.net)
        .await
        .context("starting the p2p server")?;

    if config.miner.enabled {
        info!(
            "Mining is enabled ({} threads); an external miner should poll the block template",
            config.miner.threads
        );
    }

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("Shutdown signal received");

    p2p.stop().await;
    core.shutdown().await?;
    info!("Clean shutdown");
    Ok(())
}
