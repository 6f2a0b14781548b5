mod common;

use account_service::services::AccountStore;
use axum::http::StatusCode;
use common::{TestApp, PASSWORD};
use serde_json::json;

fn registration(username: &str, email: &str) -> serde_json::Value {
    json!({
        "username": username,
        "email": email,
        "password": PASSWORD,
        "password2": PASSWORD,
    })
}

#[tokio::test]
async fn register_returns_representation_without_credentials() {
    let app = TestApp::spawn().await;

    let (status, body) = app
        .post("/users/register", None, registration("alice", "a@x.com"))
        .await;

    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["username"], "alice");
    assert_eq!(body["email"], "a@x.com");
    assert_eq!(body["is_verified"], false);
    assert_eq!(body["is_staff"], false);
    assert_eq!(body["groups"], json!([]));
    assert!(body.get("password").is_none());
    assert!(body.get("password_hash").is_none());

    // The new account can sign in straight away.
    app.login("alice", PASSWORD).await;
}

#[tokio::test]
async fn register_reports_duplicate_username_and_email_together() {
    let app = TestApp::spawn().await;
    let (status, _) = app
        .post("/users/register", None, registration("alice", "a@x.com"))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .post("/users/register", None, registration("alice", "a@X.COM"))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["fields"]["username"][0],
        "A user with that username already exists."
    );
    assert_eq!(
        body["fields"]["email"][0],
        "A user with that email already exists."
    );
}

#[tokio::test]
async fn register_rejects_mismatched_confirmation() {
    let app = TestApp::spawn().await;

    let (status, body) = app
        .post(
            "/users/register",
            None,
            json!({
                "username": "bob",
                "email": "bob@example.com",
                "password": PASSWORD,
                "password2": "Different!Passw0rd",
            }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let messages = body["fields"]["password"].as_array().unwrap();
    assert!(messages
        .iter()
        .any(|m| m == "Password fields didn't match."));
}

#[tokio::test]
async fn register_applies_password_policy() {
    let app = TestApp::spawn().await;

    let (status, body) = app
        .post(
            "/users/register",
            None,
            json!({
                "username": "carol",
                "email": "carol@example.com",
                "password": "12345",
                "password2": "12345",
            }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    // Short and entirely numeric: both rules are reported.
    assert!(body["fields"]["password"].as_array().unwrap().len() >= 2);
}

#[tokio::test]
async fn register_requires_fields() {
    let app = TestApp::spawn().await;

    let (status, body) = app
        .post("/users/register", None, json!({ "username": "dave" }))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["fields"].get("email").is_some());
    assert!(body["fields"].get("password").is_some());
    assert!(body["fields"].get("password2").is_some());
}

#[tokio::test]
async fn register_rejects_invalid_username_characters() {
    let app = TestApp::spawn().await;

    let (status, body) = app
        .post(
            "/users/register",
            None,
            registration("not valid!", "nv@example.com"),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["fields"].get("username").is_some());
}

#[tokio::test]
async fn register_with_groups_links_them() {
    let app = TestApp::spawn().await;
    let group = app.create_group("Customer").await;

    let mut body = registration("erin", "erin@example.com");
    body["group_ids"] = json!([group.group_id]);
    let (status, body) = app.post("/users/register", None, body).await;

    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["groups"][0]["name"], "Customer");
}

#[tokio::test]
async fn register_with_unknown_group_is_a_field_error() {
    let app = TestApp::spawn().await;

    let mut body = registration("frank", "frank@example.com");
    body["group_ids"] = json!([uuid::Uuid::new_v4()]);
    let (status, body) = app.post("/users/register", None, body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["fields"].get("group_ids").is_some());
    let stored = app
        .store
        .find_account_by_username("frank")
        .await
        .unwrap();
    assert!(stored.is_none());
}
