use reconcile::RemoteSource;
use serde_json::json;
use tag_sync::{AccountConfig, TagSyncError, WeChatClient, WeChatConfig};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> WeChatClient {
    let config = WeChatConfig {
        base_url: server.uri(),
        request_timeout_seconds: 5
    };
    let accounts = vec![AccountConfig {
        app_id: "wx-app".to_string(),
        app_secret: "secret".to_string()
    }];
    WeChatClient::new(&config, &accounts).unwrap()
}

async fn mount_token(server: &MockServer, token: &str, times: u64) {
    Mock::given(method("GET"))
        .and(path("/cgi-bin/token"))
        .and(query_param("grant_type", "client_credential"))
        .and(query_param("appid", "wx-app"))
        .and(query_param("secret", "secret"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access_token": token, "expires_in": 7200 }))
        )
        .expect(times)
        .mount(server)
        .await;
}

async fn mount_tags(server: &MockServer, token: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/cgi-bin/tags/get"))
        .and(query_param("access_token", token))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_list_tags() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", 1).await;
    mount_tags(
        &server,
        "tok-1",
        json!({ "tags": [
            { "id": 2, "name": "star", "count": 0 },
            { "id": 100, "name": "vip", "count": 12 }
        ]})
    )
    .await;

    let client = client_for(&server);
    let tags = client.list_tags("wx-app").await.unwrap();

    assert_eq!(tags.len(), 2);
    assert_eq!(tags[0].id, 2);
    assert_eq!(tags[1].name, "vip");
    assert_eq!(tags[1].count, 12);
}

#[tokio::test]
async fn test_token_is_cached_between_calls() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", 1).await;
    mount_tags(&server, "tok-1", json!({ "tags": [] })).await;

    let client = client_for(&server);
    client.list_tags("wx-app").await.unwrap();
    client.list_tags("wx-app").await.unwrap();
}

#[tokio::test]
async fn test_invalid_token_is_refreshed_once() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/cgi-bin/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access_token": "stale", "expires_in": 7200 }))
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_token(&server, "fresh", 1).await;

    mount_tags(
        &server,
        "stale",
        json!({ "errcode": 40001, "errmsg": "invalid credential" })
    )
    .await;
    mount_tags(&server, "fresh", json!({ "tags": [{ "id": 7, "name": "new" }] })).await;

    let client = client_for(&server);
    let tags = client.list_tags("wx-app").await.unwrap();

    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].name, "new");
}

#[tokio::test]
async fn test_api_error_is_surfaced() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", 1).await;
    mount_tags(
        &server,
        "tok-1",
        json!({ "errcode": 45009, "errmsg": "reach max api daily quota limit" })
    )
    .await;

    let client = client_for(&server);
    let err = client.list_tags("wx-app").await.unwrap_err();

    assert!(matches!(err, TagSyncError::WeChatApi { errcode: 45009, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_token_error_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "errcode": 40125, "errmsg": "invalid appsecret" }))
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.list_tags("wx-app").await.unwrap_err();

    assert!(matches!(err, TagSyncError::WeChatApi { errcode: 40125, .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_http_failure() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", 1).await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/tags/get"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.list_tags("wx-app").await.unwrap_err();

    assert!(matches!(err, TagSyncError::HttpStatus { status: 502, .. }));
}

#[tokio::test]
async fn test_missing_tags_field_is_malformed() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", 1).await;
    mount_tags(&server, "tok-1", json!({ "errcode": 0 })).await;

    let client = client_for(&server);
    let err = client.list_tags("wx-app").await.unwrap_err();

    assert!(matches!(err, TagSyncError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_unknown_account_makes_no_request() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", 0).await;

    let client = client_for(&server);
    let err = client.list_tags("wx-other").await.unwrap_err();

    assert!(matches!(err, TagSyncError::UnknownAccount(ref app_id) if app_id == "wx-other"));
}

#[tokio::test]
async fn test_fetch_all_maps_tags_to_entities() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", 1).await;
    mount_tags(
        &server,
        "tok-1",
        json!({ "tags": [{ "id": 2, "name": "star" }, { "id": 3, "name": "vip" }] })
    )
    .await;

    let client = client_for(&server);
    let entities = client.fetch_all("wx-app").await.unwrap();

    assert_eq!(entities.len(), 2);
    assert!(entities.iter().all(|entity| entity.namespace == "wx-app"));
    assert_eq!(entities[0].external_key, 2);
    assert_eq!(entities[1].attributes, "vip");
}
