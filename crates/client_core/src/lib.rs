use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chain_rpc::{fetch_network_config, NetworkConfig, StoragePath};
use futures::StreamExt;
use reqwest::Client;
use shared::{
    domain::{lookup_entry, Brand, BrandRegistry, InstanceHandle, OfferId, Purse},
    error::LookupNotFound,
    protocol::{OfferSpec, OfferStatusTag, OfferStatusUpdate, OfferSubmission},
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, watch, Mutex},
    task::JoinHandle,
    time::{timeout_at, Instant},
};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, warn};

pub mod offer;
pub mod rpc_wallet;
pub mod store;
pub mod watcher;

pub use offer::{build_join_proposal, OfferBuildError, OfferPhase};
pub use store::{AppState, AppStore, WalletInfo};
pub use watcher::{ChainStorageWatcher, FeedHandle, DEFAULT_POLL_INTERVAL};

pub const INSTANCES_PATH: &str = "published.agoricNames.instance";
pub const BRANDS_PATH: &str = "published.agoricNames.brand";

// defaults mirror the local-chain dev environment the dapp ships against
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub network_config_url: String,
    pub contract_name: String,
    pub item_brand_name: String,
    pub price_brand_name: String,
    pub invitation_maker: String,
    pub want_keyword: String,
    pub give_keyword: String,
    // None tracks forever
    pub offer_deadline: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            network_config_url: "https://local.agoric.net/network-config".to_string(),
            contract_name: "game1".to_string(),
            item_brand_name: "Place".to_string(),
            price_brand_name: "IST".to_string(),
            invitation_maker: "makeJoinInvitation".to_string(),
            want_keyword: "Places".to_string(),
            give_keyword: "Price".to_string(),
            offer_deadline: Some(Duration::from_secs(300)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("chain suggestion against '{url}' failed: {reason}")]
    SuggestChain { url: String, reason: String },
    #[error("wallet bridge construction failed: {reason}")]
    WalletConstruction { reason: String },
    #[error("wallet connection already in progress or established")]
    AlreadyConnected,
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    InstanceLocated {
        name: String,
        instance: InstanceHandle,
    },
    BrandsUpdated {
        count: usize,
    },
    LookupFailed {
        error: LookupNotFound,
    },
    WalletConnected {
        address: String,
    },
    WalletDisconnected,
    PursesUpdated {
        count: usize,
    },
    OfferStatusChanged {
        id: OfferId,
        update: OfferStatusUpdate,
    },
    OfferAccepted {
        id: OfferId,
    },
    OfferRefunded {
        id: OfferId,
    },
    OfferFailed {
        id: OfferId,
        reason: String,
    },
    OfferTimedOut {
        id: OfferId,
    },
}

#[async_trait]
pub trait WalletBridge: Send + Sync {
    fn address(&self) -> String;

    // carries None until the wallet publishes its first snapshot
    fn purse_feed(&self) -> watch::Receiver<Option<Vec<Purse>>>;

    async fn submit_offer(
        &self,
        submission: OfferSubmission,
    ) -> Result<mpsc::Receiver<OfferStatusUpdate>>;
}

// holding a network config is the proof that chain suggestion already ran
pub struct WalletContext {
    pub watcher: Arc<ChainStorageWatcher>,
    pub network: NetworkConfig,
}

#[async_trait]
pub trait WalletConnector: Send + Sync {
    async fn connect(&self, context: WalletContext) -> Result<Arc<dyn WalletBridge>>;
}

pub struct MissingWalletConnector;

#[async_trait]
impl WalletConnector for MissingWalletConnector {
    async fn connect(&self, _context: WalletContext) -> Result<Arc<dyn WalletBridge>> {
        Err(anyhow!("wallet connector unavailable in this build"))
    }
}

pub struct DappClient {
    http: Client,
    config: ClientConfig,
    watcher: Arc<ChainStorageWatcher>,
    connector: Arc<dyn WalletConnector>,
    store: AppStore,
    inner: Mutex<DappClientState>,
    wallet_session: Mutex<Option<WalletSession>>,
    events: broadcast::Sender<ClientEvent>,
}

struct DappClientState {
    connection: ConnectionState,
    feeds_started: bool,
    feeds: Vec<FeedHandle>,
}

struct WalletSession {
    bridge: Arc<dyn WalletBridge>,
    purse_task: JoinHandle<()>,
}

impl DappClient {
    pub fn new(config: ClientConfig, watcher: Arc<ChainStorageWatcher>) -> Arc<Self> {
        Self::new_with_connector(config, watcher, Arc::new(MissingWalletConnector))
    }

    pub fn new_with_connector(
        config: ClientConfig,
        watcher: Arc<ChainStorageWatcher>,
        connector: Arc<dyn WalletConnector>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            http: Client::new(),
            config,
            watcher,
            connector,
            store: AppStore::new(),
            inner: Mutex::new(DappClientState {
                connection: ConnectionState::Disconnected,
                feeds_started: false,
                feeds: Vec::new(),
            }),
            wallet_session: Mutex::new(None),
            events,
        })
    }

    pub fn store(&self) -> &AppStore {
        &self.store
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.inner.lock().await.connection
    }

    // only the first call registers feeds
    pub async fn start(&self) {
        let mut inner = self.inner.lock().await;
        if inner.feeds_started {
            return;
        }
        inner.feeds_started = true;

        let instance_feed = self.watch_instances();
        let brand_feed = self.watch_brands();
        inner.feeds.push(instance_feed);
        inner.feeds.push(brand_feed);
    }

    fn watch_instances(&self) -> FeedHandle {
        let store = self.store.clone();
        let events = self.events.clone();
        let contract_name = self.config.contract_name.clone();
        self.watcher.watch_latest::<Vec<(String, InstanceHandle)>, _>(
            StoragePath::new(INSTANCES_PATH),
            move |instances| {
                match lookup_entry(&instances, "agoricNames.instance", &contract_name) {
                    Ok(instance) => {
                        info!(contract = %contract_name, %instance, "contract instance located");
                        store.set_contract_instance(instance.clone());
                        let _ = events.send(ClientEvent::InstanceLocated {
                            name: contract_name.clone(),
                            instance: instance.clone(),
                        });
                    }
                    Err(error) => {
                        warn!(%error, "instance lookup failed, keeping previous value");
                        let _ = events.send(ClientEvent::LookupFailed { error });
                    }
                }
            },
        )
    }

    fn watch_brands(&self) -> FeedHandle {
        let store = self.store.clone();
        let events = self.events.clone();
        self.watcher.watch_latest::<Vec<(String, Brand)>, _>(
            StoragePath::new(BRANDS_PATH),
            move |brands| {
                let registry = BrandRegistry(brands);
                let count = registry.len();
                debug!(count, "brand registry updated");
                store.set_brands(registry);
                let _ = events.send(ClientEvent::BrandsUpdated { count });
            },
        )
    }

    // chain suggestion, then wallet construction, then the purse loop;
    // a second call while a session exists is rejected
    pub async fn connect(&self) -> std::result::Result<(), ConnectError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.connection != ConnectionState::Disconnected {
                return Err(ConnectError::AlreadyConnected);
            }
            inner.connection = ConnectionState::Connecting;
        }

        match self.establish_session().await {
            Ok(address) => {
                info!(%address, "wallet connected");
                let _ = self.events.send(ClientEvent::WalletConnected { address });
                Ok(())
            }
            Err(err) => {
                let mut inner = self.inner.lock().await;
                inner.connection = ConnectionState::Disconnected;
                Err(err)
            }
        }
    }

    async fn establish_session(&self) -> std::result::Result<String, ConnectError> {
        let network = fetch_network_config(&self.http, &self.config.network_config_url)
            .await
            .map_err(|err| ConnectError::SuggestChain {
                url: self.config.network_config_url.clone(),
                reason: err.to_string(),
            })?;
        info!(chain = %network.chain_name, "chain suggestion accepted");

        let bridge = self
            .connector
            .connect(WalletContext {
                watcher: Arc::clone(&self.watcher),
                network,
            })
            .await
            .map_err(|err| ConnectError::WalletConstruction {
                reason: err.to_string(),
            })?;

        let address = bridge.address();
        let purse_task = self.spawn_purse_loop(bridge.purse_feed());
        {
            let mut session = self.wallet_session.lock().await;
            *session = Some(WalletSession { bridge, purse_task });
        }
        {
            let mut inner = self.inner.lock().await;
            inner.connection = ConnectionState::Connected;
        }
        self.store.set_wallet(WalletInfo {
            address: address.clone(),
        });
        Ok(address)
    }

    fn spawn_purse_loop(&self, feed: watch::Receiver<Option<Vec<Purse>>>) -> JoinHandle<()> {
        let store = self.store.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let mut snapshots = WatchStream::new(feed);
            while let Some(snapshot) = snapshots.next().await {
                let Some(purses) = snapshot else { continue };
                let count = purses.len();
                debug!(count, "purse snapshot replaced");
                store.set_purses(purses);
                let _ = events.send(ClientEvent::PursesUpdated { count });
            }
        })
    }

    // clears wallet-scoped state only; chain-scoped fields stay
    pub async fn disconnect(&self) {
        {
            let mut inner = self.inner.lock().await;
            if inner.connection != ConnectionState::Connected {
                return;
            }
            inner.connection = ConnectionState::Disconnected;
        }
        if let Some(session) = self.wallet_session.lock().await.take() {
            session.purse_task.abort();
        }
        self.store.clear_wallet();
        self.store.clear_purses();
        info!("wallet disconnected");
        let _ = self.events.send(ClientEvent::WalletDisconnected);
    }

    pub async fn shutdown(&self) {
        self.disconnect().await;
        let mut inner = self.inner.lock().await;
        for feed in inner.feeds.drain(..) {
            feed.cancel();
        }
        inner.feeds_started = false;
    }

    // settlement is asynchronous; watch client events for the outcome
    pub async fn make_offer(&self, desired_places: Vec<String>, price: u64) -> Result<OfferId> {
        let bridge = {
            let session = self.wallet_session.lock().await;
            match session.as_ref() {
                Some(session) => Arc::clone(&session.bridge),
                None => return Err(OfferBuildError::MissingWallet.into()),
            }
        };
        let state = self.store.snapshot();
        let instance = state
            .contract_instance
            .ok_or(OfferBuildError::MissingInstance)?;
        let brands = state.brands.ok_or(OfferBuildError::MissingBrands)?;

        let proposal = build_join_proposal(&self.config, &brands, &desired_places, price)?;
        let id = OfferId::fresh();
        let submission = OfferSubmission {
            id,
            invitation_spec: OfferSpec::Contract {
                instance,
                public_invitation_maker: self.config.invitation_maker.clone(),
            },
            proposal,
            offer_args: None,
        };

        info!(offer = %id, places = desired_places.len(), price, "submitting join offer");
        let updates = bridge
            .submit_offer(submission)
            .await
            .context("offer submission failed")?;
        self.spawn_offer_tracker(id, updates);
        Ok(id)
    }

    fn spawn_offer_tracker(&self, id: OfferId, mut updates: mpsc::Receiver<OfferStatusUpdate>) {
        let events = self.events.clone();
        let deadline = self.config.offer_deadline.map(|limit| Instant::now() + limit);
        tokio::spawn(async move {
            let mut phase = OfferPhase::Submitted;
            loop {
                let next = match deadline {
                    Some(deadline) => match timeout_at(deadline, updates.recv()).await {
                        Ok(next) => next,
                        Err(_) => {
                            warn!(offer = %id, ?phase, "no terminal status before deadline");
                            let _ = events.send(ClientEvent::OfferTimedOut { id });
                            return;
                        }
                    },
                    None => updates.recv().await,
                };
                let Some(update) = next else {
                    debug!(offer = %id, ?phase, "status feed closed");
                    return;
                };
                phase = phase.apply(&update);
                match update.status {
                    OfferStatusTag::Accepted => {
                        info!(offer = %id, "offer accepted");
                        let _ = events.send(ClientEvent::OfferAccepted { id });
                        return;
                    }
                    OfferStatusTag::Refunded => {
                        info!(offer = %id, "offer refunded");
                        let _ = events.send(ClientEvent::OfferRefunded { id });
                        return;
                    }
                    OfferStatusTag::Error => {
                        // not terminal, the wallet may still settle it
                        let reason = offer::error_reason(&update);
                        error!(offer = %id, %reason, "offer reported an error");
                        let _ = events.send(ClientEvent::OfferFailed { id, reason });
                    }
                    OfferStatusTag::Seated | OfferStatusTag::Other => {
                        debug!(offer = %id, ?phase, "offer status update");
                        let _ = events.send(ClientEvent::OfferStatusChanged { id, update });
                    }
                }
            }
        });
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
