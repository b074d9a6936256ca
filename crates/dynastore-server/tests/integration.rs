//! End-to-end tests driving the HTTP envelope: target-header dispatch,
//! response shapes, the error `__type` bodies, and the documented
//! behavioral scenarios.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use dynastore_core::DynaStore;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_router() -> (Router, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = DynaStore::open(dir.path().join("data"), dir.path().join("snapshots")).unwrap();
    (dynastore_server::router(db), dir)
}

async fn call(router: &Router, operation: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("Content-Type", "application/x-amz-json-1.0")
        .header("X-Amz-Target", format!("DynamoDB_20120810.{operation}"))
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value: Value = serde_json::from_slice(&bytes).expect("response body is JSON");
    (status, value)
}

async fn create_simple_table(router: &Router, name: &str) {
    let (status, _) = call(
        router,
        "CreateTable",
        json!({
            "TableName": name,
            "KeySchema": [{"AttributeName": "id", "KeyType": "HASH"}]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_create_put_get_roundtrip() {
    let (router, _dir) = test_router();

    let (status, body) = call(
        &router,
        "CreateTable",
        json!({
            "TableName": "T",
            "KeySchema": [{"AttributeName": "id", "KeyType": "HASH"}]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["TableDescription"]["TableStatus"], "ACTIVE");

    let (status, _) = call(
        &router,
        "PutItem",
        json!({"TableName": "T", "Item": {"id": {"S": "a"}, "x": {"N": "1"}}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &router,
        "GetItem",
        json!({"TableName": "T", "Key": {"id": {"S": "a"}}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"Item": {"id": {"S": "a"}, "x": {"N": "1"}}}));
}

#[tokio::test]
async fn test_get_missing_item_returns_empty_item() {
    let (router, _dir) = test_router();
    create_simple_table(&router, "T").await;

    let (status, body) = call(
        &router,
        "GetItem",
        json!({"TableName": "T", "Key": {"id": {"S": "ghost"}}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"Item": {}}));
}

#[tokio::test]
async fn test_conditional_insert_fails_second_time() {
    let (router, _dir) = test_router();
    create_simple_table(&router, "T").await;

    let put = json!({
        "TableName": "T",
        "Item": {"id": {"S": "a"}},
        "ConditionExpression": "attribute_not_exists(id)"
    });
    let (status, _) = call(&router, "PutItem", put.clone()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&router, "PutItem", put).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["__type"],
        "com.amazon.coral.service#ConditionCheckFailedException"
    );
}

#[tokio::test]
async fn test_update_item_counter_and_return_values() {
    let (router, _dir) = test_router();
    create_simple_table(&router, "T").await;
    call(
        &router,
        "PutItem",
        json!({"TableName": "T", "Item": {"id": {"S": "k"}, "c": {"N": "0"}}}),
    )
    .await;

    for _ in 0..3 {
        let (status, _) = call(
            &router,
            "UpdateItem",
            json!({
                "TableName": "T",
                "Key": {"id": {"S": "k"}},
                "UpdateExpression": "SET c = c + :one",
                "ExpressionAttributeValues": {":one": {"N": "1"}}
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = call(
        &router,
        "UpdateItem",
        json!({
            "TableName": "T",
            "Key": {"id": {"S": "k"}},
            "UpdateExpression": "SET note = :n",
            "ExpressionAttributeValues": {":n": {"S": "done"}},
            "ReturnValues": "ALL_NEW"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Attributes"]["c"], json!({"N": "3"}));
    assert_eq!(body["Attributes"]["note"], json!({"S": "done"}));
}

#[tokio::test]
async fn test_delete_item_return_values_all_old() {
    let (router, _dir) = test_router();
    create_simple_table(&router, "T").await;
    call(
        &router,
        "PutItem",
        json!({"TableName": "T", "Item": {"id": {"S": "a"}, "v": {"S": "bye"}}}),
    )
    .await;

    let (status, body) = call(
        &router,
        "DeleteItem",
        json!({
            "TableName": "T",
            "Key": {"id": {"S": "a"}},
            "ReturnValues": "ALL_OLD"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Attributes"]["v"], json!({"S": "bye"}));

    let (_, body) = call(
        &router,
        "GetItem",
        json!({"TableName": "T", "Key": {"id": {"S": "a"}}}),
    )
    .await;
    assert_eq!(body, json!({"Item": {}}));
}

#[tokio::test]
async fn test_gsi_maintenance_scenario() {
    let (router, _dir) = test_router();
    let (status, _) = call(
        &router,
        "CreateTable",
        json!({
            "TableName": "U",
            "KeySchema": [{"AttributeName": "id", "KeyType": "HASH"}],
            "GlobalSecondaryIndexes": [{
                "IndexName": "byEmail",
                "KeySchema": [{"AttributeName": "email", "KeyType": "HASH"}]
            }]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    call(
        &router,
        "PutItem",
        json!({"TableName": "U", "Item": {"id": {"S": "u1"}, "email": {"S": "a@x"}}}),
    )
    .await;

    let query_email = |email: &str| {
        json!({
            "TableName": "U",
            "IndexName": "byEmail",
            "KeyConditionExpression": "email = :v",
            "ExpressionAttributeValues": {":v": {"S": email}}
        })
    };

    let (_, body) = call(&router, "Query", query_email("a@x")).await;
    assert_eq!(body["Count"], 1);
    assert_eq!(body["Items"][0]["id"], json!({"S": "u1"}));

    call(
        &router,
        "UpdateItem",
        json!({
            "TableName": "U",
            "Key": {"id": {"S": "u1"}},
            "UpdateExpression": "SET email = :e",
            "ExpressionAttributeValues": {":e": {"S": "b@x"}}
        }),
    )
    .await;
    let (_, body) = call(&router, "Query", query_email("a@x")).await;
    assert_eq!(body["Count"], 0);
    let (_, body) = call(&router, "Query", query_email("b@x")).await;
    assert_eq!(body["Count"], 1);

    call(
        &router,
        "DeleteItem",
        json!({"TableName": "U", "Key": {"id": {"S": "u1"}}}),
    )
    .await;
    let (_, body) = call(&router, "Query", query_email("a@x")).await;
    assert_eq!(body["Count"], 0);
    let (_, body) = call(&router, "Query", query_email("b@x")).await;
    assert_eq!(body["Count"], 0);
}

#[tokio::test]
async fn test_transaction_cancellation_has_no_partial_effect() {
    let (router, _dir) = test_router();
    create_simple_table(&router, "T").await;

    let (status, body) = call(
        &router,
        "TransactWriteItems",
        json!({
            "TransactItems": [
                {"Put": {"TableName": "T", "Item": {"id": {"S": "a"}}}},
                {"ConditionCheck": {
                    "TableName": "T",
                    "Key": {"id": {"S": "b"}},
                    "ConditionExpression": "attribute_exists(id)"
                }}
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["__type"],
        "com.amazon.coral.service#TransactionCanceledException"
    );
    assert_eq!(body["CancellationReasons"][0]["Code"], "None");
    assert_eq!(
        body["CancellationReasons"][1]["Code"],
        "ConditionalCheckFailed"
    );

    let (_, body) = call(
        &router,
        "GetItem",
        json!({"TableName": "T", "Key": {"id": {"S": "a"}}}),
    )
    .await;
    assert_eq!(body, json!({"Item": {}}), "no partial transaction effect");
}

#[tokio::test]
async fn test_transaction_commit_applies_all_items() {
    let (router, _dir) = test_router();
    create_simple_table(&router, "T").await;

    let (status, _) = call(
        &router,
        "TransactWriteItems",
        json!({
            "TransactItems": [
                {"Put": {"TableName": "T", "Item": {"id": {"S": "a"}, "v": {"N": "1"}}}},
                {"Put": {"TableName": "T", "Item": {"id": {"S": "b"}, "v": {"N": "2"}}}}
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    for key in ["a", "b"] {
        let (_, body) = call(
            &router,
            "GetItem",
            json!({"TableName": "T", "Key": {"id": {"S": key}}}),
        )
        .await;
        assert_eq!(body["Item"]["id"], json!({"S": key}));
    }
}

#[tokio::test]
async fn test_query_pagination_scenario() {
    let (router, _dir) = test_router();
    let (status, _) = call(
        &router,
        "CreateTable",
        json!({
            "TableName": "events",
            "KeySchema": [
                {"AttributeName": "pk", "KeyType": "HASH"},
                {"AttributeName": "sk", "KeyType": "RANGE"}
            ]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    for i in 0..10 {
        call(
            &router,
            "PutItem",
            json!({
                "TableName": "events",
                "Item": {"pk": {"S": "p"}, "sk": {"N": i.to_string()}}
            }),
        )
        .await;
    }

    let mut pages: Vec<Vec<String>> = Vec::new();
    let mut start_key: Option<Value> = None;
    loop {
        let mut request = json!({
            "TableName": "events",
            "KeyConditionExpression": "pk = :p",
            "ExpressionAttributeValues": {":p": {"S": "p"}},
            "Limit": 3
        });
        if let Some(key) = start_key.take() {
            request["ExclusiveStartKey"] = key;
        }
        let (status, body) = call(&router, "Query", request).await;
        assert_eq!(status, StatusCode::OK);

        let page: Vec<String> = body["Items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["sk"]["N"].as_str().unwrap().to_string())
            .collect();
        pages.push(page);

        match body.get("LastEvaluatedKey") {
            Some(key) => start_key = Some(key.clone()),
            None => break,
        }
    }

    assert_eq!(
        pages,
        vec![
            vec!["0", "1", "2"],
            vec!["3", "4", "5"],
            vec!["6", "7", "8"],
            vec!["9"],
        ]
    );
}

#[tokio::test]
async fn test_batch_get_item() {
    let (router, _dir) = test_router();
    create_simple_table(&router, "A").await;
    create_simple_table(&router, "B").await;
    call(
        &router,
        "PutItem",
        json!({"TableName": "A", "Item": {"id": {"S": "1"}}}),
    )
    .await;
    call(
        &router,
        "PutItem",
        json!({"TableName": "B", "Item": {"id": {"S": "2"}}}),
    )
    .await;

    let (status, body) = call(
        &router,
        "BatchGetItem",
        json!({
            "RequestItems": {
                "A": {"Keys": [{"id": {"S": "1"}}, {"id": {"S": "missing"}}]},
                "B": {"Keys": [{"id": {"S": "2"}}]}
            }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Responses"]["A"].as_array().unwrap().len(), 1);
    assert_eq!(body["Responses"]["B"].as_array().unwrap().len(), 1);
    assert_eq!(body["UnprocessedKeys"], json!({}));
}

#[tokio::test]
async fn test_list_and_describe_tables() {
    let (router, _dir) = test_router();
    create_simple_table(&router, "beta").await;
    create_simple_table(&router, "alpha").await;

    let (status, body) = call(&router, "ListTables", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["TableNames"], json!(["alpha", "beta"]));

    let (status, body) = call(&router, "DescribeTable", json!({"TableName": "alpha"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["TableDescription"]["KeySchema"][0],
        json!({"AttributeName": "id", "KeyType": "HASH"})
    );

    let (status, body) = call(&router, "DescribeTable", json!({"TableName": "nope"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["__type"],
        "com.amazon.coral.service#ResourceNotFoundException"
    );
}

#[tokio::test]
async fn test_delete_table_and_resource_errors() {
    let (router, _dir) = test_router();
    create_simple_table(&router, "T").await;

    let (status, body) = call(
        &router,
        "CreateTable",
        json!({
            "TableName": "T",
            "KeySchema": [{"AttributeName": "id", "KeyType": "HASH"}]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["__type"],
        "com.amazon.coral.service#ResourceInUseException"
    );

    let (status, body) = call(&router, "DeleteTable", json!({"TableName": "T"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["TableDescription"]["TableStatus"], "DELETING");

    let (_, body) = call(&router, "ListTables", json!({})).await;
    assert_eq!(body["TableNames"], json!([]));
}

#[tokio::test]
async fn test_snapshot_roundtrip_over_the_wire() {
    let (router, _dir) = test_router();
    create_simple_table(&router, "T").await;
    call(
        &router,
        "PutItem",
        json!({"TableName": "T", "Item": {"id": {"S": "a"}, "v": {"S": "before"}}}),
    )
    .await;

    let (status, body) = call(
        &router,
        "CreateSnapshot",
        json!({"SnapshotName": "checkpoint"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["Message"].as_str().unwrap().contains("checkpoint"));

    call(
        &router,
        "PutItem",
        json!({"TableName": "T", "Item": {"id": {"S": "a"}, "v": {"S": "after"}}}),
    )
    .await;

    let (status, _) = call(
        &router,
        "LoadSnapshot",
        json!({"SnapshotName": "checkpoint"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = call(
        &router,
        "GetItem",
        json!({"TableName": "T", "Key": {"id": {"S": "a"}}}),
    )
    .await;
    assert_eq!(body["Item"]["v"], json!({"S": "before"}));

    let (status, body) = call(&router, "LoadSnapshot", json!({"SnapshotName": "nope"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["__type"],
        "com.amazon.coral.service#ResourceNotFoundException"
    );
}

#[tokio::test]
async fn test_delete_all_data() {
    let (router, _dir) = test_router();
    create_simple_table(&router, "T").await;
    call(
        &router,
        "PutItem",
        json!({"TableName": "T", "Item": {"id": {"S": "a"}}}),
    )
    .await;

    let (status, _) = call(&router, "DeleteAllData", json!({})).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = call(&router, "ListTables", json!({})).await;
    assert_eq!(body["TableNames"], json!([]));
}

#[tokio::test]
async fn test_unknown_operation() {
    let (router, _dir) = test_router();
    let (status, body) = call(&router, "DescribeLimits", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["__type"],
        "com.amazon.coral.service#UnsupportedOperationException"
    );
}

#[tokio::test]
async fn test_missing_target_header() {
    let (router, _dir) = test_router();
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .body(Body::from("{}"))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_non_post_method_rejected() {
    let (router, _dir) = test_router();
    let request = Request::builder()
        .method("GET")
        .uri("/")
        .header("X-Amz-Target", "DynamoDB_20120810.ListTables")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_malformed_json_body_is_validation_error() {
    let (router, _dir) = test_router();
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("X-Amz-Target", "DynamoDB_20120810.PutItem")
        .body(Body::from("not json"))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["__type"], "com.amazon.coral.service#ValidationException");
}

#[tokio::test]
async fn test_operation_dispatch_ignores_target_prefix() {
    let (router, _dir) = test_router();
    let request = Request::builder()
        .method("POST")
        .uri("/some/arbitrary/path")
        .header("X-Amz-Target", "Whatever_Prefix.Goes.Here.ListTables")
        .body(Body::from("{}"))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
