use std::collections::BTreeMap;

use serde_json::Value;
use shared::{
    domain::{Amount, AmountValue, BrandRegistry},
    error::LookupNotFound,
    protocol::{OfferStatusTag, OfferStatusUpdate, Proposal},
};
use thiserror::Error;

use crate::ClientConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OfferBuildError {
    #[error("wallet is not connected")]
    MissingWallet,
    #[error("contract instance has not been discovered yet")]
    MissingInstance,
    #[error("brand registry has not been delivered yet")]
    MissingBrands,
    #[error(transparent)]
    BrandNotFound(#[from] LookupNotFound),
}

// repeated place names aggregate into one bag entry; entry order is
// canonical, not the caller's
pub fn build_join_proposal(
    config: &ClientConfig,
    brands: &BrandRegistry,
    desired_places: &[String],
    price: u64,
) -> Result<Proposal, OfferBuildError> {
    let place_brand = brands.lookup(&config.item_brand_name)?;
    let price_brand = brands.lookup(&config.price_brand_name)?;

    let mut bag: BTreeMap<String, u64> = BTreeMap::new();
    for name in desired_places {
        *bag.entry(name.clone()).or_insert(0) += 1;
    }

    let mut want = BTreeMap::new();
    want.insert(
        config.want_keyword.clone(),
        Amount {
            brand: place_brand.clone(),
            value: AmountValue::CopyBag(bag.into_iter().collect()),
        },
    );
    let mut give = BTreeMap::new();
    give.insert(
        config.give_keyword.clone(),
        Amount {
            brand: price_brand.clone(),
            value: AmountValue::Nat(price),
        },
    );
    Ok(Proposal { want, give })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferPhase {
    Submitted,
    Pending,
    Errored,
    Accepted,
    Refunded,
}

impl OfferPhase {
    // an error is sticky until a terminal status supersedes it
    pub fn apply(self, update: &OfferStatusUpdate) -> Self {
        match update.status {
            OfferStatusTag::Accepted => OfferPhase::Accepted,
            OfferStatusTag::Refunded => OfferPhase::Refunded,
            OfferStatusTag::Error => OfferPhase::Errored,
            OfferStatusTag::Seated | OfferStatusTag::Other => match self {
                OfferPhase::Submitted => OfferPhase::Pending,
                other => other,
            },
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OfferPhase::Accepted | OfferPhase::Refunded)
    }
}

pub fn error_reason(update: &OfferStatusUpdate) -> String {
    match &update.data {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => "wallet reported an unspecified offer error".to_string(),
    }
}
