//! JSON wire format for work items.

use crate::error::Result;
use crate::model::WorkItem;

/// Parse a UTF-8 JSON payload into a work item.
pub fn decode(payload: &[u8]) -> Result<WorkItem> {
    Ok(serde_json::from_slice(payload)?)
}

/// Serialize a work item to its JSON payload.
pub fn encode(item: &WorkItem) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(item)?)
}

/// Decode, sign, re-encode. The whole transform a worker applies.
pub fn transform(payload: &[u8]) -> Result<Vec<u8>> {
    let mut item = decode(payload)?;
    item.sign();
    encode(&item)
}
