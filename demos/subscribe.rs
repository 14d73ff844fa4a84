use std::error::Error;

use clap::Parser;
use geyser_subscribe::stream::proto::SubscribeUpdate;
use geyser_subscribe::SubscriptionSession;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Meteora DLMM program.
const DEFAULT_OWNER: &str = "LBUZKhRxPF3XUpBCjp4YzTKgLccjZhTSDM9YuVaPwxo";

/// Subscribes to account and transaction updates.
///
/// The endpoint and token are read from `GRPC_ENDPOINT` and `GRPC_TOKEN`,
/// optionally via a `.env` file.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Filter by account pubkey.
    #[arg(short, long = "account")]
    accounts: Vec<String>,

    /// Filter by owner pubkey.
    #[arg(short, long = "owner")]
    owners: Vec<String>,

    /// Filter transactions that include this pubkey.
    #[arg(short, long = "signer")]
    signers: Vec<String>,
}

fn process_update(update: SubscribeUpdate) {
    if let Some(info) = update
        .transaction()
        .and_then(|tx| tx.transaction.as_ref())
    {
        let signature = bs58::encode(&info.signature).into_string();
        info!(%signature, "subscription response received");
        return;
    }

    if let Some(account) = update
        .account()
        .and_then(|update| update.account.as_ref())
    {
        let pk = bs58::encode(&account.pubkey).into_string();
        info!(%pk, "subscription response received");
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let dotenv = dotenvy::dotenv();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    if let Err(err) = dotenv {
        warn!(error = %err, "no .env file loaded");
    }

    let mut args = Args::parse();
    if args.accounts.is_empty() && args.owners.is_empty() && args.signers.is_empty() {
        args.owners.push(DEFAULT_OWNER.to_string());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let session =
            SubscriptionSession::new(args.accounts, args.owners, args.signers, process_update)?;

        let handle = session.handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received, closing subscription");
                handle.close();
            }
        });

        session.run().await?;
        Ok::<(), Box<dyn Error>>(())
    })
}
