use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chain_rpc::RpcStorageFetcher;
use clap::Parser;
use client_core::{
    rpc_wallet::{HttpSpendActionPoster, RpcWalletConnector},
    ChainStorageWatcher, ClientConfig, ClientEvent, DappClient,
};
use shared::domain::purse_by_petname;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::warn;

#[derive(Parser, Debug)]
struct Args {
    /// Tendermint RPC endpoint of the chain node.
    #[arg(long, default_value = "http://localhost:26657")]
    rpc_url: String,
    #[arg(long, default_value = "agoriclocal")]
    chain_id: String,
    /// Network-config endpoint used for chain suggestion.
    #[arg(long, default_value = "https://local.agoric.net/network-config")]
    network_config: String,
    /// Wallet address whose published state this client follows.
    #[arg(long)]
    address: String,
    /// Signing bridge that broadcasts spend actions.
    #[arg(long, default_value = "http://localhost:8587/spend-action")]
    signer_url: String,
    /// Submit the demo join offer once market data is in, then exit on
    /// its outcome.
    #[arg(long)]
    offer: bool,
    #[arg(long, default_value_t = 250_000)]
    price: u64,
}

fn apply_env_overrides(args: &mut Args) {
    if let Ok(v) = std::env::var("DAPP_RPC_URL") {
        args.rpc_url = v;
    }
    if let Ok(v) = std::env::var("DAPP_CHAIN_ID") {
        args.chain_id = v;
    }
    if let Ok(v) = std::env::var("DAPP_NETWORK_CONFIG") {
        args.network_config = v;
    }
    if let Ok(v) = std::env::var("DAPP_SIGNER_URL") {
        args.signer_url = v;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let mut args = Args::parse();
    apply_env_overrides(&mut args);

    let fetcher = Arc::new(RpcStorageFetcher::new(
        args.rpc_url.clone(),
        args.chain_id.clone(),
    ));
    let watcher = Arc::new(ChainStorageWatcher::new(fetcher));
    let poster = Arc::new(HttpSpendActionPoster::new(args.signer_url.clone()));
    let connector = Arc::new(RpcWalletConnector::new(args.address.clone(), poster));

    let config = ClientConfig {
        network_config_url: args.network_config.clone(),
        ..ClientConfig::default()
    };
    let price_petname = config.price_brand_name.clone();
    let client = DappClient::new_with_connector(config, watcher, connector);

    client.start().await;
    let mut events = client.subscribe_events();
    client.connect().await?;
    println!("Connected to {} as {}", args.chain_id, args.address);

    if args.offer {
        let mut store = client.store().subscribe();
        timeout(
            Duration::from_secs(30),
            store.wait_for(|state| state.contract_instance.is_some() && state.brands.is_some()),
        )
        .await
        .context("timed out waiting for the contract instance and brands")?
        .context("client state feed closed")?;

        if let Some(purses) = client.store().snapshot().purses {
            if let Some(purse) = purse_by_petname(&purses, &price_petname) {
                println!(
                    "{} balance before offer: {}",
                    price_petname,
                    serde_json::to_string(&purse.current_amount.value)?
                );
            }
        }

        let places = vec![
            "Park Place".to_string(),
            "Boardwalk".to_string(),
            "Water Works".to_string(),
        ];
        let id = client.make_offer(places, args.price).await?;
        println!("Offer {id} submitted, waiting for settlement");
    }

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "event stream lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            ClientEvent::InstanceLocated { name, instance } => {
                println!("Found contract '{name}' at instance {instance}");
            }
            ClientEvent::BrandsUpdated { count } => {
                println!("Brand registry delivered ({count} brands)");
            }
            ClientEvent::LookupFailed { error } => {
                println!("Name lookup failed: {error}");
            }
            ClientEvent::WalletConnected { address } => {
                println!("Wallet connected: {address}");
            }
            ClientEvent::WalletDisconnected => {
                println!("Wallet disconnected");
            }
            ClientEvent::PursesUpdated { count } => {
                println!("Purse snapshot ({count} purses):");
                print_purses(&client)?;
            }
            ClientEvent::OfferStatusChanged { id, update } => {
                println!("Offer {id} status: {}", update.status.as_str());
            }
            ClientEvent::OfferAccepted { id } => {
                println!("Offer {id} accepted");
                if args.offer {
                    break;
                }
            }
            ClientEvent::OfferRefunded { id } => {
                println!("Offer {id} refunded");
                if args.offer {
                    break;
                }
            }
            ClientEvent::OfferFailed { id, reason } => {
                println!("Offer {id} failed: {reason}");
            }
            ClientEvent::OfferTimedOut { id } => {
                println!("Offer {id} saw no settlement before the deadline");
                if args.offer {
                    break;
                }
            }
        }
    }

    client.shutdown().await;
    Ok(())
}

fn print_purses(client: &DappClient) -> Result<()> {
    let Some(purses) = client.store().snapshot().purses else {
        return Ok(());
    };
    for purse in &purses {
        println!(
            "  {}: {}",
            purse.brand_petname,
            serde_json::to_string(&purse.current_amount.value)?
        );
    }
    Ok(())
}
