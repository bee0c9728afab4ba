use std::sync::Arc;

use shared::domain::{BrandRegistry, InstanceHandle, Purse};
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletInfo {
    pub address: String,
}

// every field starts absent and fills in as its feed delivers
#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub wallet: Option<WalletInfo>,
    pub contract_instance: Option<InstanceHandle>,
    pub brands: Option<BrandRegistry>,
    pub purses: Option<Vec<Purse>>,
}

// setters are field-scoped, so concurrent feeds never clobber each other
#[derive(Debug, Clone)]
pub struct AppStore {
    tx: Arc<watch::Sender<AppState>>,
}

impl AppStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AppState::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> AppState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AppState> {
        self.tx.subscribe()
    }

    pub fn set_wallet(&self, wallet: WalletInfo) {
        self.tx.send_modify(|state| state.wallet = Some(wallet));
    }

    pub fn clear_wallet(&self) {
        self.tx.send_modify(|state| state.wallet = None);
    }

    pub fn set_contract_instance(&self, instance: InstanceHandle) {
        self.tx
            .send_modify(|state| state.contract_instance = Some(instance));
    }

    pub fn set_brands(&self, brands: BrandRegistry) {
        self.tx.send_modify(|state| state.brands = Some(brands));
    }

    // snapshots replace the list wholesale, never merged
    pub fn set_purses(&self, purses: Vec<Purse>) {
        self.tx.send_modify(|state| state.purses = Some(purses));
    }

    pub fn clear_purses(&self) {
        self.tx.send_modify(|state| state.purses = None);
    }
}

impl Default for AppStore {
    fn default() -> Self {
        Self::new()
    }
}
