//! Authorization Code + PKCE flow against a mock identity provider

mod common;

use common::{MockIdentityProvider, TOKEN_PATH};
use oauth_study_auth::ClientError;
use oauth_study_auth::config::ClientSettings;
use oauth_study_auth::form_login::{Credentials, FormLogin};
use oauth_study_auth::pkce_client::{AuthCodeClient, ClientEndpoints, call_protected_api};
use secrecy::ExposeSecret;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, header_regex, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

const AUTH_PATH: &str = "/realms/oauth-study/protocol/openid-connect/auth";
const LOGIN_ACTION_PATH: &str = "/realms/oauth-study/login-actions/authenticate";
const REQUIRED_ACTION_PATH: &str = "/realms/oauth-study/login-actions/required-action";

fn settings_for(idp: &MockIdentityProvider) -> ClientSettings {
    ClientSettings {
        keycloak_url: idp.server.uri(),
        ..ClientSettings::default()
    }
}

fn callback(code: &str, state: &str) -> String {
    format!("http://localhost:3000/callback?code={code}&state={state}&session_state=xyz")
}

#[tokio::test]
async fn test_code_exchanged_with_verifier() {
    let idp = MockIdentityProvider::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code-1"))
        .and(body_string_contains("code_verifier="))
        .and(body_string_contains("client_id=public-pkce-client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access.token.value",
            "token_type": "bearer",
            "expires_in": 300,
            "refresh_token": "refresh-value",
            "id_token": "id.token.value",
            "scope": "openid profile email",
            "session_state": "xyz"
        })))
        .expect(1)
        .mount(&idp.server)
        .await;

    let settings = settings_for(&idp);
    let client = AuthCodeClient::new(&settings, ClientEndpoints::keycloak(&settings.issuer())).unwrap();
    let pending = client.begin();
    let state = pending.state.secret().clone();

    let tokens = client
        .complete(pending, &callback("auth-code-1", &state))
        .await
        .unwrap();

    assert_eq!(tokens.access_token.expose_secret(), "access.token.value");
    assert_eq!(
        tokens.refresh_token.as_ref().map(|t| t.expose_secret().as_str()),
        Some("refresh-value")
    );
    assert_eq!(
        tokens.id_token.as_ref().map(|t| t.expose_secret().as_str()),
        Some("id.token.value")
    );
    assert_eq!(tokens.scopes, vec!["openid", "profile", "email"]);
    assert!(!tokens.is_expired());
}

#[tokio::test]
async fn test_token_endpoint_error_surfaced() {
    let idp = MockIdentityProvider::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Code not valid"
        })))
        .mount(&idp.server)
        .await;

    let settings = settings_for(&idp);
    let client = AuthCodeClient::new(&settings, ClientEndpoints::keycloak(&settings.issuer())).unwrap();
    let pending = client.begin();
    let state = pending.state.secret().clone();

    let err = client
        .complete(pending, &callback("stale", &state))
        .await
        .unwrap_err();

    match err {
        ClientError::Provider { error, description } => {
            assert_eq!(error, "invalid_grant");
            assert_eq!(description.as_deref(), Some("Code not valid"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_forged_state_never_reaches_token_endpoint() {
    let idp = MockIdentityProvider::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&idp.server)
        .await;

    let settings = settings_for(&idp);
    let client = AuthCodeClient::new(&settings, ClientEndpoints::keycloak(&settings.issuer())).unwrap();
    let pending = client.begin();

    let err = client
        .complete(pending, &callback("code", "attacker-state"))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::StateMismatch));
}

#[tokio::test]
async fn test_client_from_discovery() {
    let idp = MockIdentityProvider::start().await;
    idp.mock_discovery().await;

    let client = AuthCodeClient::discover(&settings_for(&idp)).await.unwrap();
    let pending = client.begin();

    assert!(
        pending
            .url
            .as_str()
            .starts_with(&format!("{}/protocol/openid-connect/auth", idp.issuer()))
    );
    assert!(client.end_session_url(None, None).is_some());
}

fn login_page(idp: &MockIdentityProvider) -> String {
    format!(
        r#"<html><body>
        <form id="kc-form-login" action="{}{LOGIN_ACTION_PATH}?session_code=abc&amp;tab_id=t1" method="post">
            <input id="username" name="username" value="" type="text"/>
            <input id="password" name="password" type="password"/>
            <input type="hidden" name="credentialId" value=""/>
            <input name="login" type="submit" value="Sign In"/>
        </form></body></html>"#,
        idp.server.uri()
    )
}

/// Login page with a session cookie, a form post that redirects through a
/// required action, then to the client callback
async fn mock_login_pages(idp: &MockIdentityProvider, state: &str) {
    Mock::given(method("GET"))
        .and(path(AUTH_PATH))
        .and(query_param("code_challenge_method", "S256"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "AUTH_SESSION_ID=s1; Path=/")
                .insert_header("content-type", "text/html")
                .set_body_string(login_page(idp)),
        )
        .expect(1)
        .mount(&idp.server)
        .await;

    Mock::given(method("POST"))
        .and(path(LOGIN_ACTION_PATH))
        .and(query_param("session_code", "abc"))
        .and(query_param("tab_id", "t1"))
        .and(header_regex("cookie", "AUTH_SESSION_ID=s1"))
        .and(body_string_contains("username=demo"))
        .and(body_string_contains("password=s3cret"))
        .and(body_string_contains("credentialId="))
        .respond_with(ResponseTemplate::new(302).insert_header("location", REQUIRED_ACTION_PATH))
        .expect(1)
        .mount(&idp.server)
        .await;

    Mock::given(method("GET"))
        .and(path(REQUIRED_ACTION_PATH))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", callback("auth-code-1", state).as_str()),
        )
        .expect(1)
        .mount(&idp.server)
        .await;
}

#[tokio::test]
async fn test_headless_credential_login() {
    let idp = MockIdentityProvider::start().await;
    let settings = settings_for(&idp);
    let client = AuthCodeClient::new(&settings, ClientEndpoints::keycloak(&settings.issuer())).unwrap();
    let pending = client.begin();
    let state = pending.state.secret().clone();

    mock_login_pages(&idp, &state).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("code=auth-code-1"))
        .and(body_string_contains("code_verifier="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access.token.value",
            "token_type": "bearer",
            "expires_in": 300
        })))
        .expect(1)
        .mount(&idp.server)
        .await;

    let login = FormLogin::new(&settings.redirect_uri).unwrap();
    let callback_url = login
        .run(&pending.url, &Credentials::new("demo", "s3cret"))
        .await
        .unwrap();

    assert_eq!(callback_url.path(), "/callback");
    let tokens = client.complete(pending, callback_url.as_str()).await.unwrap();
    assert_eq!(tokens.access_token.expose_secret(), "access.token.value");
}

#[tokio::test]
async fn test_headless_login_with_rejected_credentials() {
    let idp = MockIdentityProvider::start().await;
    let settings = settings_for(&idp);
    let client = AuthCodeClient::new(&settings, ClientEndpoints::keycloak(&settings.issuer())).unwrap();
    let pending = client.begin();

    Mock::given(method("GET"))
        .and(path(AUTH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(login_page(&idp)))
        .mount(&idp.server)
        .await;
    // Keycloak re-renders the form with an error message
    Mock::given(method("POST"))
        .and(path(LOGIN_ACTION_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(login_page(&idp)))
        .mount(&idp.server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&idp.server)
        .await;

    let err = FormLogin::new(&settings.redirect_uri)
        .unwrap()
        .run(&pending.url, &Credentials::new("demo", "wrong"))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::LoginFailed(_)), "{err:?}");
}

#[tokio::test]
async fn test_headless_login_reuses_provider_session() {
    let idp = MockIdentityProvider::start().await;
    let settings = settings_for(&idp);
    let client = AuthCodeClient::new(&settings, ClientEndpoints::keycloak(&settings.issuer())).unwrap();
    let pending = client.begin();
    let state = pending.state.secret().clone();

    Mock::given(method("GET"))
        .and(path(AUTH_PATH))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", callback("auth-code-2", &state).as_str()),
        )
        .mount(&idp.server)
        .await;

    let callback_url = FormLogin::new(&settings.redirect_uri)
        .unwrap()
        .run(&pending.url, &Credentials::new("demo", "unused"))
        .await
        .unwrap();

    assert!(callback_url.as_str().contains("code=auth-code-2"));
}

#[tokio::test]
async fn test_call_protected_api() {
    let idp = MockIdentityProvider::start().await;
    Mock::given(method("GET"))
        .and(path("/api/hello"))
        .and(header("authorization", "Bearer access.token.value"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "message": "hi" })))
        .mount(&idp.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/broken"))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .mount(&idp.server)
        .await;

    let client = reqwest::Client::new();

    let ok = call_protected_api(
        &client,
        &format!("{}/api/hello", idp.server.uri()),
        "access.token.value",
    )
    .await
    .unwrap();
    assert_eq!(ok.status, 200);
    assert_eq!(ok.body, json!({ "message": "hi" }));

    let broken = call_protected_api(
        &client,
        &format!("{}/api/broken", idp.server.uri()),
        "access.token.value",
    )
    .await
    .unwrap();
    assert_eq!(broken.status, 502);
    assert_eq!(broken.body, json!({}));
}
