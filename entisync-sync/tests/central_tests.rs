use entisync_sync::central::{CentralClient, CentralConfig, RetryPolicy, TokenCache};
use entisync_sync::{CreateSource, EntityListRef, EntityPatch, EntityRemote, NewEntity, RemoteError};
use entisync_types::{EntityId, FieldValue};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ID: &str = "85cb9aff-005e-4edd-9739-dc9c1a829c44";

async fn server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/sessions"))
        .and(body_json(json!({"email": "me@example.com", "password": "pw"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "tok-1"})))
        .mount(&server)
        .await;
    server
}

fn client(server: &MockServer, cache: Option<TokenCache>) -> CentralClient {
    let config = CentralConfig::new(server.uri(), "me@example.com", "pw");
    CentralClient::new(&config, cache)
        .unwrap()
        .with_retry(RetryPolicy {
            max_retries: 3,
            backoff_base: Duration::from_millis(1),
        })
}

fn trees() -> EntityListRef {
    EntityListRef::new(1, "trees")
}

// ── Construction ────────────────────────────────────────────────

#[test]
fn base_url_is_normalized() {
    let config = CentralConfig::new("https://central.example.com/", "u", "p");
    let client = CentralClient::new(&config, None).unwrap();
    assert_eq!(client.base_url(), "https://central.example.com/v1/");
    assert_eq!(client.provider_name(), "ODK Central");
}

#[test]
fn empty_credentials_are_rejected() {
    let config = CentralConfig::new("https://central.example.com", "u", "");
    assert!(matches!(
        CentralClient::new(&config, None),
        Err(RemoteError::Config(_))
    ));
}

// ── Snapshot ────────────────────────────────────────────────────

#[tokio::test]
async fn fetch_reads_odata_feed() {
    let server = server().await;
    Mock::given(method("GET"))
        .and(path("/v1/projects/1/datasets/trees.svc/Entities"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "@odata.context": "ignored",
            "value": [{
                "__id": ID,
                "label": "Oak",
                "__system": {"version": 3, "createdAt": "2024-04-17T13:16:32.957Z"},
                "height": "12",
                "girth": null
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let rows = client(&server, None).fetch_target_rows(&trees()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id.to_string(), ID);
    assert_eq!(rows[0].label, "Oak");
    assert_eq!(rows[0].version(), 3);
    assert_eq!(rows[0].properties["height"], Some("12".to_string()));
    assert_eq!(rows[0].properties["girth"], None);
}

#[tokio::test]
async fn transient_errors_are_retried() {
    let server = server().await;
    Mock::given(method("GET"))
        .and(path("/v1/projects/1/datasets/trees.svc/Entities"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/projects/1/datasets/trees.svc/Entities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
        .expect(1)
        .mount(&server)
        .await;

    let rows = client(&server, None).fetch_target_rows(&trees()).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn api_errors_carry_problem_details() {
    let server = server().await;
    Mock::given(method("GET"))
        .and(path("/v1/projects/1/datasets/trees.svc/Entities"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "code": 404.1,
            "message": "Could not find the resource you were looking for."
        })))
        .mount(&server)
        .await;

    let err = client(&server, None).fetch_target_rows(&trees()).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.code(), Some("404.1"));
    assert!(err.to_string().contains("Could not find the resource"));
}

// ── Properties ──────────────────────────────────────────────────

#[tokio::test]
async fn register_property_reports_creation() {
    let server = server().await;
    Mock::given(method("POST"))
        .and(path("/v1/projects/1/datasets/trees/properties"))
        .and(body_json(json!({"name": "height"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/projects/1/datasets/trees/properties"))
        .and(body_json(json!({"name": "girth"})))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": 409.3,
            "message": "A resource already exists with name,datasetId value(s) of girth,1."
        })))
        .mount(&server)
        .await;

    let client = client(&server, None);
    assert!(client.register_property(&trees(), "height").await.unwrap());
    assert!(!client.register_property(&trees(), "girth").await.unwrap());
}

// ── Writes ──────────────────────────────────────────────────────

#[tokio::test]
async fn batch_create_sends_text_values_and_source() {
    let server = server().await;
    Mock::given(method("POST"))
        .and(path("/v1/projects/1/datasets/trees/entities"))
        .and(body_json(json!({
            "entities": [
                {"label": "Oak", "data": {"height": "12", "girth": null, "native": "true"}}
            ],
            "source": {"name": "survey.csv", "size": "1 row"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let row = NewEntity {
        label: "Oak".into(),
        data: [
            ("height".to_string(), FieldValue::Integer(12)),
            ("girth".to_string(), FieldValue::Null),
            ("native".to_string(), FieldValue::Bool(true)),
        ]
        .into_iter()
        .collect(),
    };
    let source = CreateSource {
        name: "survey.csv".into(),
        size: Some("1 row".into()),
    };
    client(&server, None)
        .batch_create(&trees(), vec![row], &source)
        .await
        .unwrap();
}

#[tokio::test]
async fn update_sends_base_version_and_parses_entity() {
    let server = server().await;
    Mock::given(method("PATCH"))
        .and(path(format!("/v1/projects/1/datasets/trees/entities/{ID}")))
        .and(query_param("baseVersion", "3"))
        .and(body_json(json!({"label": "Oak", "data": {"height": "13"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uuid": ID,
            "createdAt": "2024-04-17T13:16:32.957Z",
            "currentVersion": {"label": "Oak", "version": 4, "data": {"height": "13", "girth": ""}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let patch = EntityPatch {
        label: Some("Oak".into()),
        data: Some([("height".to_string(), FieldValue::Integer(13))].into_iter().collect()),
    };
    let row = client(&server, None)
        .update_row(&trees(), EntityId::parse(ID).unwrap(), patch, 3)
        .await
        .unwrap();
    assert_eq!(row.version(), 4);
    assert_eq!(row.properties["height"], Some("13".to_string()));
}

#[tokio::test]
async fn stale_update_is_a_conflict_and_not_retried() {
    let server = server().await;
    Mock::given(method("PATCH"))
        .and(path(format!("/v1/projects/1/datasets/trees/entities/{ID}")))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": 409.15,
            "message": "Base version (3) does not match the current version (4)."
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server, None)
        .update_row(&trees(), EntityId::parse(ID).unwrap(), EntityPatch::default(), 3)
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn delete_targets_entity_path() {
    let server = server().await;
    Mock::given(method("DELETE"))
        .and(path(format!("/v1/projects/1/datasets/trees/entities/{ID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    client(&server, None)
        .delete_row(&trees(), EntityId::parse(ID).unwrap())
        .await
        .unwrap();
}

// ── Authentication ──────────────────────────────────────────────

#[tokio::test]
async fn cached_token_is_verified_and_reused() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/users/current"))
        .and(header("authorization", "Bearer cached"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 5})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "fresh"})))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/projects/1/datasets/trees.svc/Entities"))
        .and(header("authorization", "Bearer cached"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let cache = TokenCache::new(dir.path().join("cache.toml"));
    cache.write("cached").unwrap();

    let client = client(&server, Some(cache));
    client.fetch_target_rows(&trees()).await.unwrap();
    client.fetch_target_rows(&trees()).await.unwrap();
}

#[tokio::test]
async fn invalid_cached_token_triggers_login_and_cache_refresh() {
    let server = server().await;
    Mock::given(method("GET"))
        .and(path("/v1/users/current"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/projects/1/datasets/trees.svc/Entities"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let cache = TokenCache::new(dir.path().join("cache.toml"));
    cache.write("expired").unwrap();

    client(&server, Some(cache.clone()))
        .fetch_target_rows(&trees())
        .await
        .unwrap();
    assert_eq!(cache.read().as_deref(), Some("tok-1"));
}

#[tokio::test]
async fn rejected_session_logs_in_again_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "tok-2"})))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/projects/1/datasets/trees.svc/Entities"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let err = client(&server, None).fetch_target_rows(&trees()).await.unwrap_err();
    assert_eq!(err.status(), Some(401));
}

#[tokio::test]
async fn failed_login_is_an_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/sessions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "code": 401.2,
            "message": "Could not authenticate with the provided credentials."
        })))
        .mount(&server)
        .await;

    let err = client(&server, None).fetch_target_rows(&trees()).await.unwrap_err();
    assert!(matches!(err, RemoteError::Auth(_)));
}
