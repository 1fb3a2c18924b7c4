use std::error::Error;
use std::fs::File;
use std::io::{self, BufReader};
use std::sync::Arc;

use clap::Parser;
use tokio_stream::wrappers::ReceiverStream;
use tracing::level_filters::LevelFilter;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use wallet_cart::checkout::catalog::MemoryCatalog;
use wallet_cart::checkout::ledger::MemoryRecordStore;
use wallet_cart::config::Cli;
use wallet_cart::csv::{read_commands, write_cart};
use wallet_cart::persistence::{
    FileCache, LocalCache, MemoryCache, MemoryRemoteStore, PersistenceCoordinator,
};
use wallet_cart::{CartEngine, CheckoutAggregator};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.commands.extension().is_none_or(|ext| ext != "csv") {
        warn!(path = %cli.commands.display(), "input file seems to not be a csv file");
    }

    let local: Arc<dyn LocalCache> = match &cli.cache_file {
        Some(path) => Arc::new(FileCache::open(path)?),
        None => Arc::new(MemoryCache::new()),
    };
    let config = cli.cart_config();
    let remote = Arc::new(MemoryRemoteStore::new());
    let persistence = PersistenceCoordinator::new(Arc::clone(&local), remote, &config);

    let commands = read_commands(&cli.commands)?;
    let mut engine = CartEngine::new(persistence);
    if let Some(path) = &cli.catalog {
        let catalog = MemoryCatalog::from_reader(BufReader::new(File::open(path)?))?;
        let aggregator = CheckoutAggregator::new(
            Arc::new(catalog),
            Arc::new(MemoryRecordStore::new()),
            local,
            config.shipping_fee,
        );
        engine = engine.with_checkout(Arc::new(aggregator));
    }
    let (cmd_sender, cmd_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in commands {
            match result {
                Ok(command) => {
                    if cmd_sender.send(command).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    engine.run(ReceiverStream::new(cmd_receiver)).await;
    engine.flush().await;

    write_cart(engine.cart().items(), io::stdout().lock())?;
    Ok(())
}
