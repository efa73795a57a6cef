use caracal_gateway::auth::{AuthConfig, AuthMode, TokenValidator};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn rejects_a_token_with_no_resolvable_signing_key() {
    // 1. Setup JWKS mock
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/jwks.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "keys": [] // Empty keys => validation always fails for RS256
        })))
        .mount(&mock_server)
        .await;

    // 2. Config Strict
    let mut config = AuthConfig::default();
    config.mode = AuthMode::Strict;
    config.jwks_uri = Some(mock_server.uri().parse().unwrap());
    config.jwks_uri.as_mut().unwrap().set_path("/jwks.json");

    let validator = TokenValidator::new(
        caracal_gateway::auth::JwksProvider::new(config.jwks_uri.clone().unwrap()).ok(),
    );

    // 3. Test invalid token
    let token = "bad.token.struct";
    let res = validator.validate(token, &config).await;
    assert!(res.is_err());
    assert!(res.unwrap_err().to_string().contains("JWT header"));
}
