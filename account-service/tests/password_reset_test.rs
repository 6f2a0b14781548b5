mod common;

use axum::http::StatusCode;
use common::{TestApp, FRONTEND_URL, PASSWORD};
use serde_json::json;

const NEW_PASSWORD: &str = "Brand!New0ne";

fn token_from_link(link: &str) -> String {
    link.rsplit('/').next().unwrap().to_string()
}

#[tokio::test]
async fn reset_flow_replaces_the_password_once() {
    let app = TestApp::spawn().await;
    app.create_account("alice", false, false).await;

    let (status, body) = app
        .post(
            "/users/forgot_password",
            None,
            json!({ "email": "alice@example.com" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["message"],
        "If an account with that email exists, a password reset link has been sent."
    );

    let sent = app.email.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "alice@example.com");
    assert!(sent[0]
        .link
        .starts_with(&format!("{}/reset-password/", FRONTEND_URL)));

    let token = token_from_link(&sent[0].link);
    assert_eq!(token.len(), 32);
    assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));

    let reset = json!({
        "token": token,
        "new_password": NEW_PASSWORD,
        "new_password2": NEW_PASSWORD,
    });
    let (status, body) = app.post("/users/reset_password", None, reset.clone()).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["message"], "Password has been reset successfully.");

    // The old password is gone and the new one works.
    let (status, _) = app
        .post(
            "/auth/login",
            None,
            json!({ "username": "alice", "password": PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    app.login("alice", NEW_PASSWORD).await;

    // Tokens are single use.
    let (status, body) = app.post("/users/reset_password", None, reset).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid or expired token.");
}

#[tokio::test]
async fn reset_accepts_the_reset_token_field_name() {
    let app = TestApp::spawn().await;
    app.create_account("alice", false, false).await;
    app.post(
        "/users/forgot_password",
        None,
        json!({ "email": "alice@example.com" }),
    )
    .await;
    let token = token_from_link(&app.email.last_link().unwrap());

    let (status, body) = app
        .post(
            "/users/reset_password",
            None,
            json!({ "reset_token": token, "new_password": NEW_PASSWORD, "new_password2": NEW_PASSWORD }),
        )
        .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    app.login("alice", NEW_PASSWORD).await;
}

#[tokio::test]
async fn forgot_password_is_silent_for_unknown_email() {
    let app = TestApp::spawn().await;

    let (status, body) = app
        .post(
            "/users/forgot_password",
            None,
            json!({ "email": "nobody@example.com" }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["message"],
        "If an account with that email exists, a password reset link has been sent."
    );
    assert!(app.email.sent().is_empty());
}

#[tokio::test]
async fn forgot_password_is_silent_for_inactive_account() {
    let app = TestApp::spawn().await;
    app.create_inactive_account("mallory").await;

    let (status, _) = app
        .post(
            "/users/forgot_password",
            None,
            json!({ "email": "mallory@example.com" }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert!(app.email.sent().is_empty());
}

#[tokio::test]
async fn forgot_password_validates_email_format() {
    let app = TestApp::spawn().await;

    let (status, body) = app
        .post("/users/forgot_password", None, json!({ "email": "not-an-email" }))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["fields"].get("email").is_some());
}

#[tokio::test]
async fn second_request_overwrites_the_first_token() {
    let app = TestApp::spawn().await;
    app.create_account("alice", false, false).await;

    for _ in 0..2 {
        let (status, _) = app
            .post(
                "/users/forgot_password",
                None,
                json!({ "email": "alice@example.com" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let sent = app.email.sent();
    let first = token_from_link(&sent[0].link);
    let second = token_from_link(&sent[1].link);

    let (status, _) = app
        .post(
            "/users/reset_password",
            None,
            json!({ "token": first, "new_password": NEW_PASSWORD, "new_password2": NEW_PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post(
            "/users/reset_password",
            None,
            json!({ "token": second, "new_password": NEW_PASSWORD, "new_password2": NEW_PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn reset_with_unknown_token_is_rejected() {
    let app = TestApp::spawn().await;

    let (status, body) = app
        .post(
            "/users/reset_password",
            None,
            json!({
                "token": "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
                "new_password": NEW_PASSWORD,
                "new_password2": NEW_PASSWORD,
            }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid or expired token.");
}

#[tokio::test]
async fn reset_keeps_the_token_when_new_password_is_rejected() {
    let app = TestApp::spawn().await;
    app.create_account("alice", false, false).await;
    app.post(
        "/users/forgot_password",
        None,
        json!({ "email": "alice@example.com" }),
    )
    .await;
    let token = token_from_link(&app.email.last_link().unwrap());

    let (status, body) = app
        .post(
            "/users/reset_password",
            None,
            json!({ "token": token, "new_password": NEW_PASSWORD, "new_password2": "Other!Passw0rd" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["fields"]["new_password"][0],
        "Password fields didn't match."
    );

    let (status, _) = app
        .post(
            "/users/reset_password",
            None,
            json!({ "token": token, "new_password": NEW_PASSWORD, "new_password2": NEW_PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let app = TestApp::spawn_with(|config| config.password.reset_token_ttl_minutes = 0).await;
    app.create_account("alice", false, false).await;
    app.post(
        "/users/forgot_password",
        None,
        json!({ "email": "alice@example.com" }),
    )
    .await;
    let token = token_from_link(&app.email.last_link().unwrap());

    let (status, body) = app
        .post(
            "/users/reset_password",
            None,
            json!({ "token": token, "new_password": NEW_PASSWORD, "new_password2": NEW_PASSWORD }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid or expired token.");
}

#[tokio::test]
async fn change_password_checks_the_old_password() {
    let app = TestApp::spawn().await;
    let (_, token) = app.user("alice").await;

    let (status, body) = app
        .post(
            "/users/change_password",
            Some(&token),
            json!({
                "old_password": "Wrong!Passw0rd",
                "new_password": NEW_PASSWORD,
                "new_password2": NEW_PASSWORD,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Wrong password.");

    let (status, body) = app
        .post(
            "/users/change_password",
            Some(&token),
            json!({
                "old_password": PASSWORD,
                "new_password": NEW_PASSWORD,
                "new_password2": NEW_PASSWORD,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Password updated successfully.");

    app.login("alice", NEW_PASSWORD).await;
}

#[tokio::test]
async fn change_password_requires_authentication() {
    let app = TestApp::spawn().await;

    let (status, _) = app
        .post(
            "/users/change_password",
            None,
            json!({
                "old_password": PASSWORD,
                "new_password": NEW_PASSWORD,
                "new_password2": NEW_PASSWORD,
            }),
        )
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
