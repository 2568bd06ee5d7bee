use std::collections::{BTreeMap, HashMap};

use crate::CellId;
use crate::error::{ExtractError, Result};

/// Re-key extraction results from cell ids to caller-facing labels.
///
/// Only cells named in `labels` are returned; each must have a result.
pub fn remap_labels<V>(
    labels: &HashMap<CellId, String>,
    mut results: HashMap<CellId, V>,
) -> Result<BTreeMap<String, V>> {
    labels
        .iter()
        .map(|(id, label)| {
            results
                .remove(id)
                .map(|value| (label.clone(), value))
                .ok_or(ExtractError::UnknownCellId(*id))
        })
        .collect()
}
