use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::LookupNotFound;

macro_rules! board_id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

board_id_newtype!(Brand);
board_id_newtype!(InstanceHandle);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OfferId(pub i64);

impl OfferId {
    // epoch millis, nudged past the previous id when two offers land
    // in the same tick
    pub fn fresh() -> Self {
        static LAST: AtomicI64 = AtomicI64::new(0);
        let now = chrono::Utc::now().timestamp_millis();
        let prev = LAST
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        Self(now.max(prev + 1))
    }
}

impl std::fmt::Display for OfferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssetKind {
    Nat,
    CopyBag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayInfo {
    pub decimal_places: Option<u8>,
    pub asset_kind: AssetKind,
}

// copy-bag entries are (name, count) pairs on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AmountValue {
    Nat(u64),
    CopyBag(Vec<(String, u64)>),
}

impl AmountValue {
    pub fn asset_kind(&self) -> AssetKind {
        match self {
            AmountValue::Nat(_) => AssetKind::Nat,
            AmountValue::CopyBag(_) => AssetKind::CopyBag,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub brand: Brand,
    pub value: AmountValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Purse {
    pub brand: Brand,
    pub brand_petname: String,
    pub current_amount: Amount,
    pub display_info: DisplayInfo,
}

pub fn purse_by_petname<'a>(purses: &'a [Purse], petname: &str) -> Option<&'a Purse> {
    purses.iter().find(|purse| purse.brand_petname == petname)
}

// duplicate names are tolerated; the first entry wins
pub fn lookup_entry<'a, T>(
    entries: &'a [(String, T)],
    list: &str,
    name: &str,
) -> Result<&'a T, LookupNotFound> {
    entries
        .iter()
        .find(|(entry_name, _)| entry_name == name)
        .map(|(_, value)| value)
        .ok_or_else(|| LookupNotFound {
            list: list.to_string(),
            name: name.to_string(),
        })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandRegistry(pub Vec<(String, Brand)>);

impl BrandRegistry {
    pub fn lookup(&self, name: &str) -> Result<&Brand, LookupNotFound> {
        lookup_entry(&self.0, "agoricNames.brand", name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_takes_first_entry_on_duplicate_names() {
        let registry = BrandRegistry(vec![
            ("IST".to_string(), Brand::new("board0257")),
            ("Place".to_string(), Brand::new("board0074")),
            ("IST".to_string(), Brand::new("board9999")),
        ]);

        let brand = registry.lookup("IST").expect("IST present");
        assert_eq!(brand, &Brand::new("board0257"));
    }

    #[test]
    fn lookup_miss_reports_list_and_name() {
        let registry = BrandRegistry(vec![("IST".to_string(), Brand::new("board0257"))]);

        let err = registry.lookup("Place").expect_err("Place absent");
        assert_eq!(err.list, "agoricNames.brand");
        assert_eq!(err.name, "Place");
    }

    #[test]
    fn fresh_offer_ids_never_collide() {
        let ids: Vec<i64> = (0..64).map(|_| OfferId::fresh().0).collect();
        for pair in ids.windows(2) {
            assert!(pair[1] > pair[0], "ids must increase: {pair:?}");
        }
    }

    #[test]
    fn amount_values_keep_their_wire_shape() {
        let nat = AmountValue::Nat(250_000);
        assert_eq!(
            serde_json::to_string(&nat).expect("encode nat"),
            "250000"
        );

        let bag = AmountValue::CopyBag(vec![
            ("Boardwalk".to_string(), 1),
            ("Park Place".to_string(), 2),
        ]);
        let encoded = serde_json::to_string(&bag).expect("encode bag");
        assert_eq!(encoded, r#"[["Boardwalk",1],["Park Place",2]]"#);

        let decoded: AmountValue = serde_json::from_str(&encoded).expect("decode bag");
        assert_eq!(decoded, bag);
        assert_eq!(decoded.asset_kind(), AssetKind::CopyBag);
    }
}
