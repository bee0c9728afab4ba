use thiserror::Error;

// the feed that produced the miss stays registered; the next delivery
// may succeed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no entry named '{name}' in {list}")]
pub struct LookupNotFound {
    pub list: String,
    pub name: String,
}
