use super::*;
use chrono::Utc;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(server: &MockServer) -> InstagramProvider {
    let config = InstagramConfig {
        client_id: "app-1".into(),
        client_secret: "app-secret".into(),
        token_url: format!("{}/oauth/access_token", server.uri()),
        graph_base: server.uri(),
        ..InstagramConfig::default()
    };
    InstagramProvider::new(
        config,
        "https://bridge.kalma.io/auth/instagram/callback".into(),
        reqwest::Client::new(),
    )
}

#[tokio::test]
async fn test_authorize_url_comma_scopes() {
    let server = MockServer::start().await;
    let url = provider(&server).authorize_url("S").unwrap();
    let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
    assert_eq!(pairs["client_id"], "app-1");
    assert_eq!(pairs["response_type"], "code");
    assert!(pairs["scope"].contains("instagram_business_basic,"));
    assert_eq!(pairs["state"], "S");
}

#[tokio::test]
async fn test_exchange_code_upgrades_to_long_lived() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/access_token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(|req: &wiremock::Request| String::from_utf8_lossy(&req.body).ends_with("code=abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "short-token",
            "user_id": 17841400000000000_u64,
            "permissions": "instagram_business_basic,instagram_business_manage_messages"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/access_token"))
        .and(query_param("grant_type", "ig_exchange_token"))
        .and(query_param("access_token", "short-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "long-token",
            "token_type": "bearer",
            "expires_in": 5183944
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tokens = provider(&server).exchange_code("abc123#_").await.unwrap();
    assert_eq!(tokens.access_token, "long-token");
    assert_eq!(tokens.expires_in, Some(5_183_944));
    assert!(tokens.refresh_token.is_none());
    assert_eq!(tokens.scopes.len(), 2);
}

#[tokio::test]
async fn test_exchange_code_error_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/access_token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error_type": "OAuthException",
            "code": 400,
            "error_message": "This authorization code has been used"
        })))
        .mount(&server)
        .await;

    let err = provider(&server).exchange_code("used").await.unwrap_err();
    match err {
        KalmaError::TokenExchange { message, .. } => {
            assert_eq!(message, "This authorization code has been used");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_fetch_profile_numeric_user_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v21.0/me"))
        .and(query_param("access_token", "long-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "9001",
            "user_id": "17841400000000000",
            "username": "kalma.shop",
            "account_type": "BUSINESS"
        })))
        .mount(&server)
        .await;

    let tokens = TokenSet {
        access_token: "long-token".into(),
        ..TokenSet::default()
    };
    let profile = provider(&server).fetch_profile(&tokens).await.unwrap();
    assert_eq!(profile.external_account_id, "17841400000000000");
    assert_eq!(profile.username.as_deref(), Some("kalma.shop"));
}

#[tokio::test]
async fn test_refresh_long_lived_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/refresh_access_token"))
        .and(query_param("grant_type", "ig_refresh_token"))
        .and(query_param("access_token", "long-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "long-token-2",
            "token_type": "bearer",
            "expires_in": 5184000
        })))
        .mount(&server)
        .await;

    let connection = Connection {
        user_id: "u1".into(),
        platform: Platform::Instagram,
        access_token: "long-token".into(),
        refresh_token: None,
        expiry: Some(0),
        external_account_id: "178".into(),
        username: None,
        scopes: vec!["instagram_business_basic".into()],
        profile: serde_json::Value::Null,
        connected_at: Utc::now(),
        updated_at: Utc::now(),
    };
    let tokens = provider(&server).refresh(&connection).await.unwrap();
    assert_eq!(tokens.access_token, "long-token-2");
    assert_eq!(tokens.scopes, vec!["instagram_business_basic".to_string()]);
}

#[tokio::test]
async fn test_missing_secret_is_config_missing() {
    let provider = InstagramProvider::new(
        InstagramConfig {
            client_id: "app".into(),
            ..InstagramConfig::default()
        },
        "https://x/cb".into(),
        reqwest::Client::new(),
    );
    assert!(matches!(
        provider.exchange_code("c").await,
        Err(KalmaError::ConfigMissing(field)) if field == "providers.instagram.clientSecret"
    ));
}
