use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chain_rpc::StoragePath;
use serde::Serialize;
use shared::{
    domain::{DisplayInfo, OfferId, Purse},
    protocol::{
        OfferStatusRecord, OfferStatusTag, OfferStatusUpdate, OfferSubmission, PurseRecord,
        WalletCurrentRecord, WalletUpdateRecord,
    },
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::{
    watcher::{ChainStorageWatcher, FeedHandle},
    WalletBridge, WalletConnector, WalletContext,
};

// the signing hop (browser extension, key daemon) lives outside this crate
#[async_trait]
pub trait SpendActionPoster: Send + Sync {
    async fn post(&self, address: &str, spend_action: String) -> Result<()>;
}

pub struct HttpSpendActionPoster {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpSpendActionPoster {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpendActionRequest<'a> {
    address: &'a str,
    spend_action: &'a str,
}

#[async_trait]
impl SpendActionPoster for HttpSpendActionPoster {
    async fn post(&self, address: &str, spend_action: String) -> Result<()> {
        self.http
            .post(self.endpoint.as_str())
            .json(&SpendActionRequest {
                address,
                spend_action: &spend_action,
            })
            .send()
            .await
            .context("signing bridge unreachable")?
            .error_for_status()
            .context("signing bridge rejected the spend action")?;
        Ok(())
    }
}

#[derive(Serialize)]
struct ExecuteOfferAction<'a> {
    method: &'static str,
    offer: &'a OfferSubmission,
}

type OfferRoutes = StdMutex<HashMap<OfferId, mpsc::Sender<OfferStatusUpdate>>>;

pub struct RpcWalletBridge {
    address: String,
    poster: Arc<dyn SpendActionPoster>,
    purse_tx: Arc<watch::Sender<Option<Vec<Purse>>>>,
    offer_routes: Arc<OfferRoutes>,
    feeds: Vec<FeedHandle>,
}

impl RpcWalletBridge {
    pub fn new(
        address: impl Into<String>,
        watcher: &ChainStorageWatcher,
        poster: Arc<dyn SpendActionPoster>,
    ) -> Arc<Self> {
        let address = address.into();
        let (purse_tx, _) = watch::channel(None);
        let purse_tx = Arc::new(purse_tx);
        let offer_routes: Arc<OfferRoutes> = Arc::new(StdMutex::new(HashMap::new()));

        let tx = Arc::clone(&purse_tx);
        let current_feed = watcher.watch_latest::<WalletCurrentRecord, _>(
            StoragePath::new(format!("published.wallet.{address}.current")),
            move |record| {
                let purses: Vec<Purse> = record.purses.into_iter().map(purse_from_record).collect();
                debug!(count = purses.len(), "wallet purse snapshot");
                tx.send_replace(Some(purses));
            },
        );

        let routes = Arc::clone(&offer_routes);
        let update_feed = watcher.watch_latest::<WalletUpdateRecord, _>(
            StoragePath::new(format!("published.wallet.{address}")),
            move |record| {
                let WalletUpdateRecord::OfferStatus { status } = record else {
                    return;
                };
                dispatch_offer_status(&routes, &status);
            },
        );

        Arc::new(Self {
            address,
            poster,
            purse_tx,
            offer_routes,
            feeds: vec![current_feed, update_feed],
        })
    }
}

impl Drop for RpcWalletBridge {
    fn drop(&mut self) {
        for feed in self.feeds.drain(..) {
            feed.cancel();
        }
    }
}

#[async_trait]
impl WalletBridge for RpcWalletBridge {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn purse_feed(&self) -> watch::Receiver<Option<Vec<Purse>>> {
        self.purse_tx.subscribe()
    }

    async fn submit_offer(
        &self,
        submission: OfferSubmission,
    ) -> Result<mpsc::Receiver<OfferStatusUpdate>> {
        let action = serde_json::to_string(&ExecuteOfferAction {
            method: "executeOffer",
            offer: &submission,
        })
        .context("offer does not serialize")?;

        let (tx, rx) = mpsc::channel(16);
        {
            let Ok(mut routes) = self.offer_routes.lock() else {
                return Err(anyhow!("offer route table poisoned"));
            };
            routes.insert(submission.id, tx);
        }

        if let Err(err) = self.poster.post(&self.address, action).await {
            if let Ok(mut routes) = self.offer_routes.lock() {
                routes.remove(&submission.id);
            }
            return Err(err);
        }
        info!(offer = %submission.id, "spend action posted");
        Ok(rx)
    }
}

pub struct RpcWalletConnector {
    address: String,
    poster: Arc<dyn SpendActionPoster>,
}

impl RpcWalletConnector {
    pub fn new(address: impl Into<String>, poster: Arc<dyn SpendActionPoster>) -> Self {
        Self {
            address: address.into(),
            poster,
        }
    }
}

#[async_trait]
impl WalletConnector for RpcWalletConnector {
    async fn connect(&self, context: WalletContext) -> Result<Arc<dyn WalletBridge>> {
        info!(
            chain = %context.network.chain_name,
            address = %self.address,
            "constructing rpc wallet bridge"
        );
        let bridge = RpcWalletBridge::new(
            self.address.clone(),
            &context.watcher,
            Arc::clone(&self.poster),
        );
        Ok(bridge)
    }
}

fn purse_from_record(record: PurseRecord) -> Purse {
    let brand_petname = record
        .brand_petname
        .unwrap_or_else(|| record.brand.to_string());
    let display_info = record.display_info.unwrap_or(DisplayInfo {
        decimal_places: None,
        asset_kind: record.balance.value.asset_kind(),
    });
    Purse {
        brand: record.brand,
        brand_petname,
        current_amount: record.balance,
        display_info,
    }
}

// Published status records accumulate fields, so an errored offer can
// carry its settlement in the same record: error first, then the
// refund or acceptance it resolved to.
fn updates_from_record(record: &OfferStatusRecord) -> Vec<OfferStatusUpdate> {
    let mut updates = Vec::new();
    if let Some(error) = &record.error {
        updates.push(OfferStatusUpdate::with_data(
            OfferStatusTag::Error,
            serde_json::Value::String(error.clone()),
        ));
    }
    match record.num_wants_satisfied {
        Some(0) => updates.push(OfferStatusUpdate::new(OfferStatusTag::Refunded)),
        Some(_) => updates.push(OfferStatusUpdate::new(OfferStatusTag::Accepted)),
        None if record.payouts.is_some() => {
            updates.push(OfferStatusUpdate::new(OfferStatusTag::Accepted));
        }
        None => {}
    }
    if updates.is_empty() {
        updates.push(OfferStatusUpdate::new(OfferStatusTag::Seated));
    }
    updates
}

fn dispatch_offer_status(routes: &OfferRoutes, record: &OfferStatusRecord) {
    let Ok(mut routes) = routes.lock() else {
        return;
    };
    for update in updates_from_record(record) {
        let Some(tx) = routes.get(&record.id) else {
            debug!(offer = %record.id, "status for untracked offer");
            return;
        };
        let terminal = update.status.is_terminal();
        match tx.try_send(update) {
            Ok(()) => {
                if terminal {
                    routes.remove(&record.id);
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                routes.remove(&record.id);
            }
            Err(mpsc::error::TrySendError::Full(update)) => {
                warn!(
                    offer = %record.id,
                    status = update.status.as_str(),
                    "status channel full, update dropped"
                );
            }
        }
    }
}
