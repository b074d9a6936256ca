//! HTTP front-end: accepts `POST` on any path, reads the operation from
//! the `X-Amz-Target` header suffix, and dispatches into the core.
//!
//! The core is synchronous (its I/O is the embedded KV store), so each
//! request body is handed to a blocking task; the handle is `Arc`-cheap
//! to clone per request.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use dynastore_core::{
    DynaStore, ExpressionParams, GsiSchema, QueryRequest, Record, ScanRequest, TableSchema,
    TransactItem,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::error::{ApiError, AMZ_JSON_CONTENT_TYPE};
use crate::protocol::*;

/// Build the service router around a database handle.
pub fn router(db: DynaStore) -> Router {
    Router::new()
        .fallback(handle)
        .layer(TraceLayer::new_for_http())
        .with_state(db)
}

async fn handle(
    State(db): State<DynaStore>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if method != Method::POST {
        return ApiError::method_not_allowed().into_response();
    }
    let Some(target) = headers
        .get("x-amz-target")
        .and_then(|value| value.to_str().ok())
    else {
        return ApiError::missing_target().into_response();
    };
    // The operation is the suffix after the final '.'
    // (e.g. "DynamoDB_20120810.PutItem").
    let operation = target
        .rsplit('.')
        .next()
        .unwrap_or(target)
        .trim()
        .to_string();
    debug!(%operation, "dispatching request");

    let result = tokio::task::spawn_blocking(move || dispatch(&db, &operation, &body)).await;
    match result {
        Ok(Ok(value)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, AMZ_JSON_CONTENT_TYPE)],
            value.to_string(),
        )
            .into_response(),
        Ok(Err(error)) => error.into_response(),
        Err(join_error) => ApiError::internal(format!("request task failed: {join_error}"))
            .into_response(),
    }
}

fn dispatch(db: &DynaStore, operation: &str, body: &[u8]) -> Result<serde_json::Value, ApiError> {
    match operation {
        "CreateTable" => create_table(db, parse(body)?),
        "DeleteTable" => delete_table(db, parse(body)?),
        "ListTables" => list_tables(db),
        "DescribeTable" => describe_table(db, parse(body)?),
        "PutItem" => put_item(db, parse(body)?),
        "GetItem" => get_item(db, parse(body)?),
        "UpdateItem" => update_item(db, parse(body)?),
        "DeleteItem" => delete_item(db, parse(body)?),
        "Query" => query(db, parse(body)?),
        "Scan" => scan(db, parse(body)?),
        "BatchGetItem" => batch_get_item(db, parse(body)?),
        "TransactWriteItems" => transact_write_items(db, parse(body)?),
        "CreateSnapshot" => create_snapshot(db, parse(body)?),
        "LoadSnapshot" => load_snapshot(db, parse(body)?),
        "DeleteAllData" => delete_all_data(db),
        other => Err(ApiError::unsupported_operation(other)),
    }
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|error| ApiError::validation(format!("Invalid JSON input: {error}")))
}

fn to_value<T: serde::Serialize>(output: &T) -> Result<serde_json::Value, ApiError> {
    serde_json::to_value(output)
        .map_err(|error| ApiError::internal(format!("failed to serialize response: {error}")))
}

fn params(names: Option<Names>, values: Option<Values>) -> ExpressionParams {
    ExpressionParams {
        names: names.unwrap_or_default(),
        values: values.unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Table lifecycle
// ---------------------------------------------------------------------------

fn schema_from_input(input: CreateTableInput) -> Result<TableSchema, ApiError> {
    if input.table_name.is_empty() {
        return Err(ApiError::validation("TableName must be specified"));
    }
    let (partition_key, sort_key) = split_key_schema(&input.key_schema)?;

    let mut schema = TableSchema::new(input.table_name, partition_key);
    schema.sort_key = sort_key;
    for gsi in input.global_secondary_indexes {
        let (index_pk, index_sk) = split_key_schema(&gsi.key_schema)
            .map_err(|e| ApiError::validation(format!("index {}: {}", gsi.index_name, e.message)))?;
        let mut gsi_schema = GsiSchema::new(gsi.index_name, index_pk);
        gsi_schema.sort_key = index_sk;
        schema.gsis.insert(gsi_schema.index_name.clone(), gsi_schema);
    }
    if let Some(ttl) = input.time_to_live_specification {
        if ttl.enabled {
            schema.ttl_attribute = Some(ttl.attribute_name);
        }
    }
    Ok(schema)
}

fn split_key_schema(
    elements: &[KeySchemaElement],
) -> Result<(String, Option<String>), ApiError> {
    let mut partition = None;
    let mut sort = None;
    for element in elements {
        match element.key_type.as_str() {
            "HASH" => partition = Some(element.attribute_name.clone()),
            "RANGE" => sort = Some(element.attribute_name.clone()),
            other => {
                return Err(ApiError::validation(format!("unknown KeyType: {other}")));
            }
        }
    }
    let partition =
        partition.ok_or_else(|| ApiError::validation("KeySchema must contain a HASH key"))?;
    Ok((partition, sort))
}

fn describe(schema: &TableSchema, status: &str) -> TableDescription {
    let mut key_schema = vec![KeySchemaElement {
        attribute_name: schema.partition_key.clone(),
        key_type: "HASH".into(),
    }];
    if let Some(sk) = &schema.sort_key {
        key_schema.push(KeySchemaElement {
            attribute_name: sk.clone(),
            key_type: "RANGE".into(),
        });
    }
    let global_secondary_indexes = schema
        .gsis
        .values()
        .map(|gsi| {
            let mut key_schema = vec![KeySchemaElement {
                attribute_name: gsi.partition_key.clone(),
                key_type: "HASH".into(),
            }];
            if let Some(sk) = &gsi.sort_key {
                key_schema.push(KeySchemaElement {
                    attribute_name: sk.clone(),
                    key_type: "RANGE".into(),
                });
            }
            GsiDescription {
                index_name: gsi.index_name.clone(),
                key_schema,
                index_status: "ACTIVE".into(),
            }
        })
        .collect();

    TableDescription {
        table_name: schema.table_name.clone(),
        table_status: status.into(),
        key_schema,
        global_secondary_indexes,
        item_count: 0,
    }
}

fn create_table(db: &DynaStore, input: CreateTableInput) -> Result<serde_json::Value, ApiError> {
    let schema = db.create_table(schema_from_input(input)?)?;
    to_value(&TableDescriptionOutput {
        table_description: describe(&schema, "ACTIVE"),
    })
}

fn delete_table(db: &DynaStore, input: TableNameInput) -> Result<serde_json::Value, ApiError> {
    let schema = db.delete_table(&input.table_name)?;
    to_value(&TableDescriptionOutput {
        table_description: describe(&schema, "DELETING"),
    })
}

fn list_tables(db: &DynaStore) -> Result<serde_json::Value, ApiError> {
    to_value(&ListTablesOutput {
        table_names: db.list_tables(),
    })
}

fn describe_table(db: &DynaStore, input: TableNameInput) -> Result<serde_json::Value, ApiError> {
    let schema = db.describe_table(&input.table_name)?;
    to_value(&TableDescriptionOutput {
        table_description: describe(&schema, "ACTIVE"),
    })
}

// ---------------------------------------------------------------------------
// Item operations
// ---------------------------------------------------------------------------

fn put_item(db: &DynaStore, input: PutItemInput) -> Result<serde_json::Value, ApiError> {
    let expression_params = params(
        input.expression_attribute_names,
        input.expression_attribute_values,
    );
    let old = db.put_item(
        &input.table_name,
        input.item,
        input.condition_expression.as_deref(),
        &expression_params,
    )?;
    if input.return_values.as_deref() == Some("ALL_OLD") {
        to_value(&AttributesOutput { attributes: old })
    } else {
        Ok(json!({}))
    }
}

fn get_item(db: &DynaStore, input: GetItemInput) -> Result<serde_json::Value, ApiError> {
    let item = db.get_item(&input.table_name, &input.key)?;
    to_value(&GetItemOutput {
        item: item.unwrap_or_default(),
    })
}

fn update_item(db: &DynaStore, input: UpdateItemInput) -> Result<serde_json::Value, ApiError> {
    let expression_params = params(
        input.expression_attribute_names,
        input.expression_attribute_values,
    );
    let new_record = db.update_item(
        &input.table_name,
        &input.key,
        &input.update_expression,
        input.condition_expression.as_deref(),
        &expression_params,
    )?;
    if input.return_values.as_deref() == Some("ALL_NEW") {
        to_value(&AttributesOutput {
            attributes: Some(new_record),
        })
    } else {
        Ok(json!({}))
    }
}

fn delete_item(db: &DynaStore, input: DeleteItemInput) -> Result<serde_json::Value, ApiError> {
    let expression_params = params(
        input.expression_attribute_names,
        input.expression_attribute_values,
    );
    let old = db.delete_item(
        &input.table_name,
        &input.key,
        input.condition_expression.as_deref(),
        &expression_params,
    )?;
    if input.return_values.as_deref() == Some("ALL_OLD") {
        to_value(&AttributesOutput { attributes: old })
    } else {
        Ok(json!({}))
    }
}

// ---------------------------------------------------------------------------
// Query / Scan / BatchGet
// ---------------------------------------------------------------------------

fn query(db: &DynaStore, input: QueryInput) -> Result<serde_json::Value, ApiError> {
    let request = QueryRequest {
        table: input.table_name,
        key_condition: input.key_condition_expression,
        index_name: input.index_name,
        filter: input.filter_expression,
        exclusive_start_key: input.exclusive_start_key,
        limit: input.limit.map(|n| n as usize),
        scan_forward: input.scan_index_forward.unwrap_or(true),
        params: params(
            input.expression_attribute_names,
            input.expression_attribute_values,
        ),
    };
    let result = db.query(&request)?;
    to_value(&QueryOutput {
        items: result.items,
        count: result.count,
        scanned_count: result.scanned_count,
        last_evaluated_key: result.last_evaluated_key,
    })
}

fn scan(db: &DynaStore, input: ScanInput) -> Result<serde_json::Value, ApiError> {
    let request = ScanRequest {
        table: input.table_name,
        index_name: input.index_name,
        filter: input.filter_expression,
        exclusive_start_key: input.exclusive_start_key,
        limit: input.limit.map(|n| n as usize),
        params: params(
            input.expression_attribute_names,
            input.expression_attribute_values,
        ),
    };
    let result = db.scan(&request)?;
    to_value(&QueryOutput {
        items: result.items,
        count: result.count,
        scanned_count: result.scanned_count,
        last_evaluated_key: result.last_evaluated_key,
    })
}

fn batch_get_item(db: &DynaStore, input: BatchGetItemInput) -> Result<serde_json::Value, ApiError> {
    let requests: std::collections::BTreeMap<String, Vec<Record>> = input
        .request_items
        .into_iter()
        .map(|(table, keys_and_attributes)| (table, keys_and_attributes.keys))
        .collect();
    let result = db.batch_get_item(&requests)?;
    let unprocessed_keys = result
        .unprocessed
        .into_iter()
        .map(|(table, keys)| (table, KeysAndAttributes { keys }))
        .collect();
    to_value(&BatchGetItemOutput {
        responses: result.responses,
        unprocessed_keys,
    })
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

fn transact_write_items(
    db: &DynaStore,
    input: TransactWriteItemsInput,
) -> Result<serde_json::Value, ApiError> {
    let mut items = Vec::with_capacity(input.transact_items.len());
    for entry in input.transact_items {
        let member_count = usize::from(entry.put.is_some())
            + usize::from(entry.update.is_some())
            + usize::from(entry.delete.is_some())
            + usize::from(entry.condition_check.is_some());
        if member_count != 1 {
            return Err(ApiError::validation(
                "each TransactItem must contain exactly one of Put, Update, Delete, ConditionCheck",
            ));
        }

        if let Some(put) = entry.put {
            items.push(TransactItem::Put {
                table: put.table_name,
                item: put.item,
                condition: put.condition_expression,
                params: params(
                    put.expression_attribute_names,
                    put.expression_attribute_values,
                ),
            });
        } else if let Some(update) = entry.update {
            items.push(TransactItem::Update {
                table: update.table_name,
                key: update.key,
                update_expression: update.update_expression,
                condition: update.condition_expression,
                params: params(
                    update.expression_attribute_names,
                    update.expression_attribute_values,
                ),
            });
        } else if let Some(delete) = entry.delete {
            items.push(TransactItem::Delete {
                table: delete.table_name,
                key: delete.key,
                condition: delete.condition_expression,
                params: params(
                    delete.expression_attribute_names,
                    delete.expression_attribute_values,
                ),
            });
        } else if let Some(check) = entry.condition_check {
            items.push(TransactItem::ConditionCheck {
                table: check.table_name,
                key: check.key,
                condition: check.condition_expression,
                params: params(
                    check.expression_attribute_names,
                    check.expression_attribute_values,
                ),
            });
        }
    }

    db.transact_write_items(&items)?;
    Ok(json!({}))
}

// ---------------------------------------------------------------------------
// Snapshots and bulk erase
// ---------------------------------------------------------------------------

fn create_snapshot(db: &DynaStore, input: SnapshotInput) -> Result<serde_json::Value, ApiError> {
    db.create_snapshot(&input.snapshot_name)?;
    to_value(&MessageOutput {
        message: format!("Snapshot '{}' created successfully.", input.snapshot_name),
    })
}

fn load_snapshot(db: &DynaStore, input: SnapshotInput) -> Result<serde_json::Value, ApiError> {
    db.load_snapshot(&input.snapshot_name)?;
    to_value(&MessageOutput {
        message: format!(
            "Snapshot '{}' loaded successfully. DB connection reopened.",
            input.snapshot_name
        ),
    })
}

fn delete_all_data(db: &DynaStore) -> Result<serde_json::Value, ApiError> {
    db.delete_all_data()?;
    Ok(json!({}))
}
