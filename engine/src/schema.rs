//! Wire adapters.
//!
//! Each table has a [`TableAdapter`] describing its columns: the local field
//! name, the wire column name and the expected JSON type. The adapter turns
//! a local [`Record`] into a wire row (`to_wire`), a wire row back into a
//! record (`from_wire`), and recovers a key from any row, including the
//! pre-delete snapshot of a deletion event (`key_from_wire`).
//!
//! Adapters are looked up through an [`AdapterRegistry`] keyed by [`Table`].

use crate::{Error, Record, RecordKey, Result, SyncStatus, Table};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Wire column carrying the modification timestamp.
pub const UPDATED_AT_COLUMN: &str = "updated_at";
/// Wire column carrying the sync marker.
pub const SYNC_STATUS_COLUMN: &str = "sync_status";

/// Field types supported in table definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    /// Milliseconds since epoch
    Timestamp,
    /// Arbitrary nested JSON
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Timestamp => write!(f, "Timestamp"),
            FieldType::Json => write!(f, "Json"),
        }
    }
}

/// Definition of a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name on the local record
    pub local: String,
    /// Column name on the wire
    pub wire: String,
    /// Field type
    pub field_type: FieldType,
    /// Whether this field is required
    pub required: bool,
}

impl FieldDef {
    /// Create a new required field definition.
    pub fn required(local: impl Into<String>, wire: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            local: local.into(),
            wire: wire.into(),
            field_type,
            required: true,
        }
    }

    /// Create a new optional field definition.
    pub fn optional(local: impl Into<String>, wire: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            local: local.into(),
            wire: wire.into(),
            field_type,
            required: false,
        }
    }

    /// Validate a JSON value against this field definition.
    pub fn validate(&self, value: Option<&Value>) -> Result<()> {
        match value {
            None | Some(Value::Null) if self.required => {
                Err(Error::MissingRequiredField(self.wire.clone()))
            }
            None | Some(Value::Null) => Ok(()),
            Some(v) => self.validate_type(v),
        }
    }

    fn validate_type(&self, value: &Value) -> Result<()> {
        let valid = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Timestamp => value.is_i64() || value.is_u64(),
            FieldType::Json => true,
        };

        if valid {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                field: self.wire.clone(),
                expected: self.field_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

fn as_object(row: &Value) -> Result<&Map<String, Value>> {
    row.as_object()
        .ok_or_else(|| Error::InvalidPayload("row must be an object".into()))
}

fn required_str<'a>(obj: &'a Map<String, Value>, column: &str) -> Result<&'a str> {
    obj.get(column)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::MissingRequiredField(column.to_string()))
}

/// Converts one table's records between the local and the wire shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableAdapter {
    table: Table,
    fields: Vec<FieldDef>,
}

impl TableAdapter {
    pub fn new(table: Table, fields: Vec<FieldDef>) -> Self {
        Self { table, fields }
    }

    pub fn table(&self) -> Table {
        self.table
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Recover the primary key from a wire row.
    ///
    /// Only key columns are read, so this works on partial tombstones.
    pub fn key_from_wire(&self, row: &Value) -> Result<RecordKey> {
        let obj = as_object(row)?;
        match self.table {
            Table::Inventory => {
                let product_id = required_str(obj, "product_id")?;
                let variant_id = obj.get("variant_id").and_then(Value::as_str).unwrap_or("");
                Ok(RecordKey::inventory(product_id, variant_id))
            }
            _ => Ok(RecordKey::id(required_str(obj, "id")?)),
        }
    }

    /// Tenant a wire row belongs to.
    pub fn tenant_from_wire<'a>(&self, row: &'a Value) -> Result<&'a str> {
        required_str(as_object(row)?, self.table.tenant_column())
    }

    /// Serialize a local record as a wire row.
    ///
    /// Rows leave the device marked `SYNCED`: once the backend holds them
    /// they are, by definition, in sync.
    pub fn to_wire(&self, record: &Record) -> Result<Value> {
        if record.table != self.table {
            return Err(Error::InvalidPayload(format!(
                "{} record passed to the {} adapter",
                record.table, self.table
            )));
        }
        if !record.key.fits(self.table) {
            return Err(Error::KeyMismatch {
                table: self.table,
                key: record.key.encode(),
            });
        }

        let mut row = Map::new();
        for field in &self.fields {
            let value = record.fields.get(&field.local);
            field.validate(value)?;
            if let Some(v) = value {
                row.insert(field.wire.clone(), v.clone());
            }
        }

        match &record.key {
            RecordKey::Id(id) => {
                row.insert("id".into(), Value::String(id.clone()));
            }
            RecordKey::Inventory {
                product_id,
                variant_id,
            } => {
                row.insert("product_id".into(), Value::String(product_id.clone()));
                row.insert("variant_id".into(), Value::String(variant_id.clone()));
            }
        }
        if self.table.tenant_column() == "tenant_id" {
            row.insert("tenant_id".into(), Value::String(record.tenant_id.clone()));
        }
        row.insert(UPDATED_AT_COLUMN.into(), Value::from(record.updated_at));
        row.insert(
            SYNC_STATUS_COLUMN.into(),
            Value::String(SyncStatus::Synced.as_str().into()),
        );

        Ok(Value::Object(row))
    }

    /// Decode a wire row into a local record marked `SYNCED`.
    pub fn from_wire(&self, row: &Value) -> Result<Record> {
        let obj = as_object(row)?;
        let key = self.key_from_wire(row)?;
        let tenant_id = self.tenant_from_wire(row)?.to_string();
        let updated_at = obj
            .get(UPDATED_AT_COLUMN)
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::MissingRequiredField(UPDATED_AT_COLUMN.into()))?;

        let mut fields = Map::new();
        for field in &self.fields {
            let value = obj.get(&field.wire);
            field.validate(value)?;
            if let Some(v) = value {
                fields.insert(field.local.clone(), v.clone());
            }
        }

        if let RecordKey::Inventory {
            product_id,
            variant_id,
        } = &key
        {
            fields.insert("productId".into(), Value::String(product_id.clone()));
            fields.insert("variantId".into(), Value::String(variant_id.clone()));
        }

        Ok(Record {
            table: self.table,
            key,
            tenant_id,
            sync_status: SyncStatus::Synced,
            updated_at,
            fields,
        })
    }
}

/// Registry of adapters, one per table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterRegistry {
    adapters: HashMap<Table, TableAdapter>,
}

impl AdapterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Registry with the adapter of every POS table.
    pub fn standard() -> Self {
        Table::ALL.iter().fold(Self::new(), |registry, &table| {
            registry.with_adapter(TableAdapter::new(table, standard_fields(table)))
        })
    }

    pub fn register(&mut self, adapter: TableAdapter) -> &mut Self {
        self.adapters.insert(adapter.table(), adapter);
        self
    }

    /// Builder-style method to register an adapter.
    pub fn with_adapter(mut self, adapter: TableAdapter) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, table: Table) -> Result<&TableAdapter> {
        self.adapters
            .get(&table)
            .ok_or(Error::AdapterNotFound(table))
    }

    /// Registered tables in [`Table::ALL`] order.
    pub fn tables(&self) -> Vec<Table> {
        Table::ALL
            .iter()
            .copied()
            .filter(|t| self.adapters.contains_key(t))
            .collect()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Column definitions of the POS tables (besides id, tenant, timestamps).
pub fn standard_fields(table: Table) -> Vec<FieldDef> {
    use FieldType::{Bool, Float, Int, Json, String as Str, Timestamp as Ts};

    let req = FieldDef::required;
    let opt = FieldDef::optional;

    match table {
        Table::Categories => vec![
            req("name", "name", Str),
            opt("sortOrder", "sort_order", Int),
            opt("categoryType", "category_type", Str),
        ],
        Table::Products => vec![
            opt("categoryId", "category_id", Str),
            req("name", "name", Str),
            opt("description", "description", Str),
            req("price", "price", Float),
            opt("imagePath", "image_path", Str),
            opt("isActive", "is_active", Bool),
            opt("productType", "product_type", Str),
        ],
        Table::Variants => vec![
            req("productId", "product_id", Str),
            req("name", "name", Str),
            opt("priceAdjustment", "price_adjustment", Float),
        ],
        Table::Vendors => vec![
            req("name", "name", Str),
            opt("phone", "phone", Str),
            opt("address", "address", Str),
        ],
        Table::Inventory => vec![
            opt("productId", "product_id", Str),
            opt("variantId", "variant_id", Str),
            req("currentQty", "current_qty", Float),
            opt("minQty", "min_qty", Float),
        ],
        Table::GoodsReceiving => vec![
            opt("vendorId", "vendor_id", Str),
            req("date", "date", Ts),
            opt("notes", "notes", Str),
        ],
        Table::GoodsReceivingItems => vec![
            req("receivingId", "receiving_id", Str),
            req("productId", "product_id", Str),
            opt("variantId", "variant_id", Str),
            req("qty", "qty", Float),
            opt("costPerUnit", "cost_per_unit", Float),
            opt("unit", "unit", Str),
        ],
        Table::Transactions => vec![
            opt("userId", "user_id", Str),
            req("date", "date", Ts),
            req("total", "total", Float),
            opt("paymentMethod", "payment_method", Str),
            opt("status", "status", Str),
        ],
        Table::TransactionItems => vec![
            req("transactionId", "transaction_id", Str),
            req("productId", "product_id", Str),
            opt("variantId", "variant_id", Str),
            opt("productName", "product_name", Str),
            opt("variantName", "variant_name", Str),
            req("qty", "qty", Float),
            req("unitPrice", "unit_price", Float),
            req("subtotal", "subtotal", Float),
        ],
        Table::ProductComponents => vec![
            req("parentProductId", "parent_product_id", Str),
            req("componentProductId", "component_product_id", Str),
            opt("componentVariantId", "component_variant_id", Str),
            req("requiredQty", "required_qty", Float),
            opt("unit", "unit", Str),
            opt("sortOrder", "sort_order", Int),
        ],
        Table::CashWithdrawals => vec![
            opt("userId", "user_id", Str),
            req("amount", "amount", Float),
            opt("reason", "reason", Str),
            req("date", "date", Ts),
        ],
        Table::GeneralLedger => vec![
            req("entryType", "entry_type", Str),
            req("amount", "amount", Float),
            opt("description", "description", Str),
            opt("referenceId", "reference_id", Str),
            req("date", "date", Ts),
        ],
        Table::Users => vec![
            req("name", "name", Str),
            opt("email", "email", Str),
            opt("phone", "phone", Str),
            opt("pinHash", "pin_hash", Str),
            opt("pinSalt", "pin_salt", Str),
            req("role", "role", Str),
            opt("featureAccess", "feature_access", Json),
            opt("isActive", "is_active", Bool),
        ],
        Table::Restaurants => vec![
            req("name", "name", Str),
            opt("ownerEmail", "owner_email", Str),
            opt("ownerPhone", "owner_phone", Str),
            opt("isActive", "is_active", Bool),
            opt("createdAt", "created_at", Ts),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> AdapterRegistry {
        AdapterRegistry::standard()
    }

    #[test]
    fn standard_registry_covers_every_table() {
        let registry = registry();
        assert_eq!(registry.tables(), Table::ALL.to_vec());
    }

    #[test]
    fn category_to_wire() {
        let record = Record::new(
            Table::Categories,
            RecordKey::id("cat-1"),
            "tenant-1",
            1000,
            json!({"name": "Drinks", "sortOrder": 2, "categoryType": "menu"}),
        );

        let row = registry().get(Table::Categories).unwrap().to_wire(&record).unwrap();
        assert_eq!(
            row,
            json!({
                "id": "cat-1",
                "tenant_id": "tenant-1",
                "name": "Drinks",
                "sort_order": 2,
                "category_type": "menu",
                "updated_at": 1000,
                "sync_status": "SYNCED"
            })
        );
    }

    #[test]
    fn product_from_wire() {
        let row = json!({
            "id": "p-1",
            "tenant_id": "tenant-1",
            "category_id": "cat-1",
            "name": "Latte",
            "price": 3.5,
            "is_active": true,
            "image_path": null,
            "updated_at": 5000,
            "sync_status": "PENDING"
        });

        let record = registry().get(Table::Products).unwrap().from_wire(&row).unwrap();
        assert_eq!(record.key, RecordKey::id("p-1"));
        assert_eq!(record.tenant_id, "tenant-1");
        assert_eq!(record.updated_at, 5000);
        assert_eq!(record.sync_status, SyncStatus::Synced);
        assert_eq!(record.str_field("categoryId"), Some("cat-1"));
        assert_eq!(record.f64_field("price"), Some(3.5));
        assert_eq!(record.field("isActive"), Some(&json!(true)));
    }

    #[test]
    fn inventory_key_columns() {
        let adapter = registry().get(Table::Inventory).unwrap().clone();
        let record = Record::new(
            Table::Inventory,
            RecordKey::inventory("p-1", ""),
            "tenant-1",
            10,
            json!({"currentQty": 4.0, "minQty": 1.0}),
        );

        let row = adapter.to_wire(&record).unwrap();
        assert_eq!(row["product_id"], "p-1");
        assert_eq!(row["variant_id"], "");
        assert!(row.get("id").is_none());

        let back = adapter.from_wire(&row).unwrap();
        assert_eq!(back.key, record.key);
        assert_eq!(back.str_field("variantId"), Some(""));
    }

    #[test]
    fn inventory_null_variant_means_none() {
        let adapter = registry().get(Table::Inventory).unwrap().clone();
        let key = adapter
            .key_from_wire(&json!({"product_id": "p-9", "variant_id": null}))
            .unwrap();
        assert_eq!(key, RecordKey::inventory("p-9", ""));
    }

    #[test]
    fn restaurant_tenant_is_its_id() {
        let row = json!({
            "id": "r-1",
            "name": "Warung",
            "owner_email": "owner@example.com",
            "updated_at": 1,
        });
        let adapter = registry().get(Table::Restaurants).unwrap().clone();
        let record = adapter.from_wire(&row).unwrap();
        assert_eq!(record.tenant_id, "r-1");

        let wire = adapter.to_wire(&record).unwrap();
        assert!(wire.get("tenant_id").is_none());
    }

    #[test]
    fn key_from_tombstone() {
        let adapter = registry().get(Table::Vendors).unwrap().clone();
        let key = adapter.key_from_wire(&json!({"id": "v-1"})).unwrap();
        assert_eq!(key, RecordKey::id("v-1"));
    }

    #[test]
    fn missing_required_field() {
        let record = Record::new(
            Table::Vendors,
            RecordKey::id("v-1"),
            "t",
            1,
            json!({"phone": "123"}),
        );
        let result = registry().get(Table::Vendors).unwrap().to_wire(&record);
        assert!(matches!(result, Err(Error::MissingRequiredField(f)) if f == "name"));
    }

    #[test]
    fn wrong_type() {
        let row = json!({
            "id": "t-1",
            "tenant_id": "t",
            "date": 1,
            "total": "12.00",
            "updated_at": 1
        });
        let result = registry().get(Table::Transactions).unwrap().from_wire(&row);
        assert!(matches!(result, Err(Error::TypeMismatch { field, .. }) if field == "total"));
    }

    #[test]
    fn missing_updated_at() {
        let row = json!({"id": "v-1", "tenant_id": "t", "name": "Acme"});
        let result = registry().get(Table::Vendors).unwrap().from_wire(&row);
        assert!(matches!(result, Err(Error::MissingRequiredField(f)) if f == "updated_at"));
    }

    #[test]
    fn wrong_adapter_rejected() {
        let record = Record::new(
            Table::Vendors,
            RecordKey::id("v-1"),
            "t",
            1,
            json!({"name": "Acme"}),
        );
        let result = registry().get(Table::Categories).unwrap().to_wire(&record);
        assert!(matches!(result, Err(Error::InvalidPayload(_))));
    }

    #[test]
    fn empty_registry_lookup() {
        let registry = AdapterRegistry::new();
        let result = registry.get(Table::Users);
        assert!(matches!(result, Err(Error::AdapterNotFound(Table::Users))));
    }

    #[test]
    fn feature_access_accepts_any_json() {
        let row = json!({
            "id": "u-1",
            "tenant_id": "t",
            "name": "Ana",
            "role": "cashier",
            "feature_access": {"reports": false, "void": ["own"]},
            "updated_at": 7
        });
        let record = registry().get(Table::Users).unwrap().from_wire(&row).unwrap();
        assert_eq!(record.field("featureAccess").unwrap()["void"], json!(["own"]));
    }
}
