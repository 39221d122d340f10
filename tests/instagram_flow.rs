mod common;

use axum::http::StatusCode;
use common::*;
use kalma::models::{Platform, paths};
use kalma::oauth::load_connection;
use kalma::store::SqliteStore;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_instagram(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "ig-short",
            "user_id": 17841400000000000_u64,
            "permissions": ["instagram_business_basic", "instagram_business_manage_messages"]
        })))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/access_token"))
        .and(query_param("client_secret", "ig-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "ig-long",
            "token_type": "bearer",
            "expires_in": 5_184_000
        })))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v21.0/me"))
        .and(query_param("access_token", "ig-long"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "user_id": IG_ACCOUNT,
            "username": "kalma.shop"
        })))
        .mount(server)
        .await;
}

async fn connect(app: &TestApp, user: &str) {
    let (status, headers, _) = app
        .call(get(&format!("/auth/instagram/start?userId={user}")))
        .await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    let consent = url::Url::parse(&location(&headers)).unwrap();
    assert_eq!(consent.host_str(), Some("www.instagram.com"));
    let state = consent
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap();

    let (status, headers, _) = app
        .call(get(&format!(
            "/auth/instagram/callback?code=AQBx%23_&state={state}"
        )))
        .await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(
        location(&headers),
        "https://app.kalma.io/integrations/success?platform=instagram&status=success"
    );
}

#[tokio::test]
async fn test_connect_receive_and_reply() {
    let server = MockServer::start().await;
    mount_instagram(&server).await;
    Mock::given(method("POST"))
        .and(path("/v21.0/me/messages"))
        .and(header("Authorization", "Bearer ig-long"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "recipient_id": "555",
            "message_id": "aWdfZAG1faXRlbTox"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = TestApp::new(config_for(&server.uri()));
    connect(&app, "u42").await;

    let conn = load_connection(app.store(), "u42", Platform::Instagram)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conn.external_account_id, IG_ACCOUNT);
    assert_eq!(conn.access_token, "ig-long");
    assert!(conn.is_valid());

    // inbound DM lands in the owner's inbox
    let (status, _, body) = app
        .call(signed_webhook(
            &inbound_dm("555", "mid-1", "do you ship to Lisbon?"),
            APP_SECRET,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["success"], true);
    let inbox = app.store().list(&paths::messages("u42")).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].1["isFromMe"], false);
    assert_eq!(inbox[0].1["threadId"], "555");

    // reply through the dispatcher
    let (status, _, body) = app
        .call(post_json(
            "/api/messages/send",
            &serde_json::json!({
                "platform": "instagram",
                "to": "555",
                "text": "Yes, 3-5 days.",
                "userId": "u42"
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let reply = json(&body);
    assert_eq!(reply["success"], true);
    assert_eq!(reply["messageId"], "aWdfZAG1faXRlbTox");

    let inbox = app.store().list(&paths::messages("u42")).await.unwrap();
    assert_eq!(inbox.len(), 2);
    let (status, _, _) = app
        .call(post_json("/api/messages/u42/mid-1/read", &serde_json::json!({})))
        .await;
    assert_eq!(status, StatusCode::OK);
    let inbound = app
        .store()
        .get(&paths::message("u42", "mid-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(inbound["isRead"], true);

    // connection survives a restart
    let reopened = SqliteStore::open(&app.db_path).unwrap();
    assert!(
        load_connection(&reopened, "u42", Platform::Instagram)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_send_before_connecting_fails() {
    let server = MockServer::start().await;
    let app = TestApp::new(config_for(&server.uri()));
    let (status, _, body) = app
        .call(post_json(
            "/api/messages/send",
            &serde_json::json!({"platform": "instagram", "to": "555", "text": "hi", "userId": "u1"}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let reply = json(&body);
    assert_eq!(reply["success"], false);
    assert!(reply["error"].as_str().unwrap().contains("not connected"));
}

#[tokio::test]
async fn test_state_for_other_platform_is_rejected() {
    let server = MockServer::start().await;
    let app = TestApp::new(config_for(&server.uri()));
    let (_, headers, _) = app.call(get("/auth/gmail/start?userId=u1")).await;
    let consent = url::Url::parse(&location(&headers)).unwrap();
    let state = consent
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap();

    let (status, headers, _) = app
        .call(get(&format!("/auth/instagram/callback?code=abc&state={state}")))
        .await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert!(location(&headers).contains("status=error"));
    assert!(
        app.store()
            .list(&paths::connections("u1"))
            .await
            .unwrap()
            .is_empty()
    );
}
