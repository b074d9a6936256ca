//! Wire protocol types: the JSON request and response envelopes of every
//! supported operation, named exactly as the emulated service names them.

use std::collections::{BTreeMap, HashMap};

use dynastore_core::{AttributeValue, Record};
use serde::{Deserialize, Serialize};

pub type Names = HashMap<String, String>;
pub type Values = HashMap<String, AttributeValue>;

// ---------------------------------------------------------------------------
// Table lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeySchemaElement {
    pub attribute_name: String,
    /// `"HASH"` or `"RANGE"`.
    pub key_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GsiInput {
    pub index_name: String,
    #[serde(default)]
    pub key_schema: Vec<KeySchemaElement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TimeToLiveSpecification {
    pub attribute_name: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateTableInput {
    pub table_name: String,
    #[serde(default)]
    pub key_schema: Vec<KeySchemaElement>,
    #[serde(default)]
    pub global_secondary_indexes: Vec<GsiInput>,
    #[serde(default)]
    pub time_to_live_specification: Option<TimeToLiveSpecification>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TableNameInput {
    pub table_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GsiDescription {
    pub index_name: String,
    pub key_schema: Vec<KeySchemaElement>,
    pub index_status: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TableDescription {
    pub table_name: String,
    pub table_status: String,
    pub key_schema: Vec<KeySchemaElement>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub global_secondary_indexes: Vec<GsiDescription>,
    pub item_count: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TableDescriptionOutput {
    pub table_description: TableDescription,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListTablesOutput {
    pub table_names: Vec<String>,
}

// ---------------------------------------------------------------------------
// Item operations
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutItemInput {
    pub table_name: String,
    pub item: Record,
    #[serde(default)]
    pub condition_expression: Option<String>,
    #[serde(default)]
    pub expression_attribute_names: Option<Names>,
    #[serde(default)]
    pub expression_attribute_values: Option<Values>,
    #[serde(default)]
    pub return_values: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetItemInput {
    pub table_name: String,
    pub key: Record,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateItemInput {
    pub table_name: String,
    pub key: Record,
    pub update_expression: String,
    #[serde(default)]
    pub condition_expression: Option<String>,
    #[serde(default)]
    pub expression_attribute_names: Option<Names>,
    #[serde(default)]
    pub expression_attribute_values: Option<Values>,
    #[serde(default)]
    pub return_values: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteItemInput {
    pub table_name: String,
    pub key: Record,
    #[serde(default)]
    pub condition_expression: Option<String>,
    #[serde(default)]
    pub expression_attribute_names: Option<Names>,
    #[serde(default)]
    pub expression_attribute_values: Option<Values>,
    #[serde(default)]
    pub return_values: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetItemOutput {
    /// Always present; an empty map when the item does not exist.
    pub item: Record,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttributesOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Record>,
}

// ---------------------------------------------------------------------------
// Query / Scan
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryInput {
    pub table_name: String,
    pub key_condition_expression: String,
    #[serde(default)]
    pub index_name: Option<String>,
    #[serde(default)]
    pub filter_expression: Option<String>,
    #[serde(default)]
    pub exclusive_start_key: Option<Record>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub scan_index_forward: Option<bool>,
    #[serde(default)]
    pub expression_attribute_names: Option<Names>,
    #[serde(default)]
    pub expression_attribute_values: Option<Values>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScanInput {
    pub table_name: String,
    #[serde(default)]
    pub index_name: Option<String>,
    #[serde(default)]
    pub filter_expression: Option<String>,
    #[serde(default)]
    pub exclusive_start_key: Option<Record>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub expression_attribute_names: Option<Names>,
    #[serde(default)]
    pub expression_attribute_values: Option<Values>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryOutput {
    pub items: Vec<Record>,
    pub count: usize,
    pub scanned_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_evaluated_key: Option<Record>,
}

// ---------------------------------------------------------------------------
// BatchGetItem
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeysAndAttributes {
    pub keys: Vec<Record>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchGetItemInput {
    pub request_items: BTreeMap<String, KeysAndAttributes>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchGetItemOutput {
    pub responses: BTreeMap<String, Vec<Record>>,
    pub unprocessed_keys: BTreeMap<String, KeysAndAttributes>,
}

// ---------------------------------------------------------------------------
// TransactWriteItems
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactPut {
    pub table_name: String,
    pub item: Record,
    #[serde(default)]
    pub condition_expression: Option<String>,
    #[serde(default)]
    pub expression_attribute_names: Option<Names>,
    #[serde(default)]
    pub expression_attribute_values: Option<Values>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactUpdate {
    pub table_name: String,
    pub key: Record,
    pub update_expression: String,
    #[serde(default)]
    pub condition_expression: Option<String>,
    #[serde(default)]
    pub expression_attribute_names: Option<Names>,
    #[serde(default)]
    pub expression_attribute_values: Option<Values>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactDelete {
    pub table_name: String,
    pub key: Record,
    #[serde(default)]
    pub condition_expression: Option<String>,
    #[serde(default)]
    pub expression_attribute_names: Option<Names>,
    #[serde(default)]
    pub expression_attribute_values: Option<Values>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactConditionCheck {
    pub table_name: String,
    pub key: Record,
    pub condition_expression: String,
    #[serde(default)]
    pub expression_attribute_names: Option<Names>,
    #[serde(default)]
    pub expression_attribute_values: Option<Values>,
}

/// One entry of the request; exactly one member must be set.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactWriteItemInput {
    #[serde(default)]
    pub put: Option<TransactPut>,
    #[serde(default)]
    pub update: Option<TransactUpdate>,
    #[serde(default)]
    pub delete: Option<TransactDelete>,
    #[serde(default)]
    pub condition_check: Option<TransactConditionCheck>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactWriteItemsInput {
    pub transact_items: Vec<TransactWriteItemInput>,
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnapshotInput {
    pub snapshot_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageOutput {
    pub message: String,
}
