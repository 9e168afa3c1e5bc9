//! The synced tables.
//!
//! Every table the POS synchronizes is a variant of [`Table`]. Components
//! look adapters and policies up by this enum instead of comparing table
//! name strings.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A table synchronized between the device and the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Categories,
    Products,
    Variants,
    Vendors,
    Inventory,
    GoodsReceiving,
    GoodsReceivingItems,
    Transactions,
    TransactionItems,
    ProductComponents,
    CashWithdrawals,
    GeneralLedger,
    Users,
    Restaurants,
}

/// How the push synchronizer has to treat a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableClass {
    /// One record maps to one upsert/delete call.
    Simple,
    /// A parent record owning line items in a child table.
    Aggregate,
    /// Line items; pushed through their parent.
    Child,
    /// Keyed by `(product_id, variant_id)` instead of an id.
    Composite,
}

/// Parent/child link between an aggregate table and its line items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildRelation {
    /// The child table
    pub table: Table,
    /// Field on the local child record pointing at the parent id
    pub local_field: &'static str,
    /// Same field as a wire column
    pub wire_column: &'static str,
}

impl Table {
    /// All tables, in a stable order.
    pub const ALL: [Table; 14] = [
        Table::Categories,
        Table::Products,
        Table::Variants,
        Table::Vendors,
        Table::Inventory,
        Table::GoodsReceiving,
        Table::GoodsReceivingItems,
        Table::Transactions,
        Table::TransactionItems,
        Table::ProductComponents,
        Table::CashWithdrawals,
        Table::GeneralLedger,
        Table::Users,
        Table::Restaurants,
    ];

    /// The wire/table name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Categories => "categories",
            Table::Products => "products",
            Table::Variants => "variants",
            Table::Vendors => "vendors",
            Table::Inventory => "inventory",
            Table::GoodsReceiving => "goods_receiving",
            Table::GoodsReceivingItems => "goods_receiving_items",
            Table::Transactions => "transactions",
            Table::TransactionItems => "transaction_items",
            Table::ProductComponents => "product_components",
            Table::CashWithdrawals => "cash_withdrawals",
            Table::GeneralLedger => "general_ledger",
            Table::Users => "users",
            Table::Restaurants => "restaurants",
        }
    }

    pub fn class(&self) -> TableClass {
        match self {
            Table::GoodsReceiving | Table::Transactions => TableClass::Aggregate,
            Table::GoodsReceivingItems | Table::TransactionItems => TableClass::Child,
            Table::Inventory => TableClass::Composite,
            _ => TableClass::Simple,
        }
    }

    /// Sales and receipts: append-only records owned by the device that
    /// recorded them.
    pub fn is_business_event(&self) -> bool {
        matches!(
            self,
            Table::Transactions
                | Table::TransactionItems
                | Table::GoodsReceiving
                | Table::GoodsReceivingItems
        )
    }

    /// Column holding the tenant id. Restaurants are the tenants themselves,
    /// so they are scoped by their own id.
    pub fn tenant_column(&self) -> &'static str {
        match self {
            Table::Restaurants => "id",
            _ => "tenant_id",
        }
    }

    /// Line items owned by this table, if it is an aggregate.
    pub fn child_relation(&self) -> Option<ChildRelation> {
        match self {
            Table::GoodsReceiving => Some(ChildRelation {
                table: Table::GoodsReceivingItems,
                local_field: "receivingId",
                wire_column: "receiving_id",
            }),
            Table::Transactions => Some(ChildRelation {
                table: Table::TransactionItems,
                local_field: "transactionId",
                wire_column: "transaction_id",
            }),
            _ => None,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Table::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::UnknownTable(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_roundtrip() {
        for table in Table::ALL {
            assert_eq!(table.as_str().parse::<Table>().unwrap(), table);
        }
    }

    #[test]
    fn unknown_table() {
        let result = "orders".parse::<Table>();
        assert!(matches!(result, Err(Error::UnknownTable(t)) if t == "orders"));
    }

    #[test]
    fn serde_uses_wire_name() {
        let json = serde_json::to_string(&Table::GoodsReceivingItems).unwrap();
        assert_eq!(json, "\"goods_receiving_items\"");
    }

    #[test]
    fn classes() {
        assert_eq!(Table::Categories.class(), TableClass::Simple);
        assert_eq!(Table::GeneralLedger.class(), TableClass::Simple);
        assert_eq!(Table::GoodsReceiving.class(), TableClass::Aggregate);
        assert_eq!(Table::TransactionItems.class(), TableClass::Child);
        assert_eq!(Table::Inventory.class(), TableClass::Composite);
    }

    #[test]
    fn restaurants_scoped_by_id() {
        assert_eq!(Table::Restaurants.tenant_column(), "id");
        assert_eq!(Table::Vendors.tenant_column(), "tenant_id");
    }

    #[test]
    fn child_relations() {
        let rel = Table::GoodsReceiving.child_relation().unwrap();
        assert_eq!(rel.table, Table::GoodsReceivingItems);
        assert_eq!(rel.wire_column, "receiving_id");
        assert!(Table::Products.child_relation().is_none());
    }
}
