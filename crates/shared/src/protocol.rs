use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{Amount, Brand, DisplayInfo, InstanceHandle, OfferId};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub want: BTreeMap<String, Amount>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub give: BTreeMap<String, Amount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum OfferSpec {
    #[serde(rename_all = "camelCase")]
    Contract {
        instance: InstanceHandle,
        public_invitation_maker: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferSubmission {
    pub id: OfferId,
    pub invitation_spec: OfferSpec,
    pub proposal: Proposal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer_args: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferStatusTag {
    Seated,
    Error,
    Accepted,
    Refunded,
    // unknown tags are carried, not rejected, so newer wallets stay readable
    Other,
}

impl OfferStatusTag {
    // an error is not terminal; the wallet may still settle the offer
    pub fn is_terminal(self) -> bool {
        matches!(self, OfferStatusTag::Accepted | OfferStatusTag::Refunded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OfferStatusTag::Seated => "seated",
            OfferStatusTag::Error => "error",
            OfferStatusTag::Accepted => "accepted",
            OfferStatusTag::Refunded => "refunded",
            OfferStatusTag::Other => "unknown",
        }
    }
}

impl Serialize for OfferStatusTag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OfferStatusTag {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(match tag.as_str() {
            "seated" => OfferStatusTag::Seated,
            "error" => OfferStatusTag::Error,
            "accepted" => OfferStatusTag::Accepted,
            "refunded" => OfferStatusTag::Refunded,
            _ => OfferStatusTag::Other,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferStatusUpdate {
    pub status: OfferStatusTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl OfferStatusUpdate {
    pub fn new(status: OfferStatusTag) -> Self {
        Self { status, data: None }
    }

    pub fn with_data(status: OfferStatusTag, data: serde_json::Value) -> Self {
        Self {
            status,
            data: Some(data),
        }
    }
}

// published at published.wallet.<address>.current
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletCurrentRecord {
    #[serde(default)]
    pub purses: Vec<PurseRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurseRecord {
    pub brand: Brand,
    pub balance: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_petname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_info: Option<DisplayInfo>,
}

// published at published.wallet.<address>; only offer statuses are typed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "updated", rename_all = "camelCase")]
pub enum WalletUpdateRecord {
    OfferStatus { status: OfferStatusRecord },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferStatusRecord {
    pub id: OfferId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_wants_satisfied: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payouts: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AmountValue;

    #[test]
    fn offer_spec_tags_contract_source() {
        let spec = OfferSpec::Contract {
            instance: InstanceHandle::new("board0123"),
            public_invitation_maker: "makeJoinInvitation".to_string(),
        };

        let encoded = serde_json::to_value(&spec).expect("encode invitation spec");
        assert_eq!(encoded["source"], "contract");
        assert_eq!(encoded["instance"], "board0123");
        assert_eq!(encoded["publicInvitationMaker"], "makeJoinInvitation");
    }

    #[test]
    fn submission_serializes_wallet_field_names() {
        let mut give = BTreeMap::new();
        give.insert(
            "Price".to_string(),
            Amount {
                brand: Brand::new("board0257"),
                value: AmountValue::Nat(250_000),
            },
        );
        let submission = OfferSubmission {
            id: OfferId(1_700_000_000_000),
            invitation_spec: OfferSpec::Contract {
                instance: InstanceHandle::new("board0123"),
                public_invitation_maker: "makeJoinInvitation".to_string(),
            },
            proposal: Proposal {
                want: BTreeMap::new(),
                give,
            },
            offer_args: None,
        };

        let encoded = serde_json::to_value(&submission).expect("encode submission");
        assert_eq!(encoded["invitationSpec"]["source"], "contract");
        assert_eq!(encoded["proposal"]["give"]["Price"]["value"], 250_000);
        assert!(encoded.get("offerArgs").is_none());
        assert!(encoded["proposal"].get("want").is_none());
    }

    #[test]
    fn unknown_status_tags_decode_as_other() {
        let update: OfferStatusUpdate =
            serde_json::from_str(r#"{"status":"exited"}"#).expect("decode status");
        assert_eq!(update.status, OfferStatusTag::Other);
        assert!(!update.status.is_terminal());

        let encoded = serde_json::to_value(OfferStatusUpdate::new(OfferStatusTag::Refunded))
            .expect("encode status");
        assert_eq!(encoded["status"], "refunded");
    }

    #[test]
    fn unknown_wallet_records_fall_through() {
        let record: WalletUpdateRecord =
            serde_json::from_str(r#"{"updated":"balance","currentAmount":{}}"#)
                .expect("decode balance record");
        assert_eq!(record, WalletUpdateRecord::Other);

        let record: WalletUpdateRecord = serde_json::from_str(
            r#"{"updated":"offerStatus","status":{"id":42,"numWantsSatisfied":0}}"#,
        )
        .expect("decode offer status");
        match record {
            WalletUpdateRecord::OfferStatus { status } => {
                assert_eq!(status.id, OfferId(42));
                assert_eq!(status.num_wants_satisfied, Some(0));
            }
            WalletUpdateRecord::Other => panic!("expected offer status"),
        }
    }
}
