//! Record keys.
//!
//! Most tables are addressed by a string id. Inventory rows are addressed by
//! the pair `(product_id, variant_id)`, encoded as `"productId:variantId"`
//! wherever a single string is needed (queue entries, URLs). An empty
//! variant means "no variant", so `"p1:"` is a valid key.

use crate::{Error, Result, Table};
use serde::{Deserialize, Serialize};
use std::fmt;

const COMPOSITE_SEPARATOR: char = ':';

/// Primary key of a synced record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordKey {
    Id(String),
    Inventory {
        product_id: String,
        variant_id: String,
    },
}

impl RecordKey {
    pub fn id(id: impl Into<String>) -> Self {
        RecordKey::Id(id.into())
    }

    pub fn inventory(product_id: impl Into<String>, variant_id: impl Into<String>) -> Self {
        RecordKey::Inventory {
            product_id: product_id.into(),
            variant_id: variant_id.into(),
        }
    }

    /// Encode to the single-string form.
    pub fn encode(&self) -> String {
        match self {
            RecordKey::Id(id) => id.clone(),
            RecordKey::Inventory {
                product_id,
                variant_id,
            } => format!("{product_id}{COMPOSITE_SEPARATOR}{variant_id}"),
        }
    }

    /// Decode a key previously produced by [`RecordKey::encode`] for `table`.
    ///
    /// The split happens at the first separator, so a product id must not
    /// contain `:` while a variant id may.
    pub fn decode(table: Table, encoded: &str) -> Result<Self> {
        if table != Table::Inventory {
            if encoded.is_empty() {
                return Err(Error::KeyMismatch {
                    table,
                    key: encoded.to_string(),
                });
            }
            return Ok(RecordKey::Id(encoded.to_string()));
        }

        match encoded.split_once(COMPOSITE_SEPARATOR) {
            Some((product_id, variant_id)) if !product_id.is_empty() => {
                Ok(RecordKey::inventory(product_id, variant_id))
            }
            _ => Err(Error::InvalidCompositeKey(encoded.to_string())),
        }
    }

    /// The plain id, for non-composite keys.
    pub fn as_id(&self) -> Option<&str> {
        match self {
            RecordKey::Id(id) => Some(id),
            RecordKey::Inventory { .. } => None,
        }
    }

    /// Check the key kind against the table.
    pub fn fits(&self, table: Table) -> bool {
        match self {
            RecordKey::Id(_) => table != Table::Inventory,
            RecordKey::Inventory { .. } => table == Table::Inventory,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
