//! Configuration portal tests

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use parley::config::SettingsStore;
use parley::portal::{self, PortalState};
use secrecy::ExposeSecret;
use tower::ServiceExt;

fn store_in(dir: &tempfile::TempDir) -> SettingsStore {
    SettingsStore::new(dir.path().join("settings.toml"))
}

fn save_request(body: &'static str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/save")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_form_page_has_fields() {
    let dir = tempfile::tempdir().unwrap();
    let app = portal::router(PortalState::new(store_in(&dir)));

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let html = String::from_utf8(body.to_vec()).unwrap();
    assert!(html.contains("action='/save'"));
    for field in ["name='ssid'", "name='pass'", "name='key'"] {
        assert!(html.contains(field), "missing {field}");
    }
}

#[tokio::test]
async fn test_save_persists_and_signals_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let state = PortalState::new(store.clone());
    let app = portal::router(state.clone());

    let response = app
        .oneshot(save_request("ssid=HomeNet&pass=hunter%202&key=AIza123"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    tokio::time::timeout(std::time::Duration::from_secs(1), state.restart_requested())
        .await
        .expect("restart was not signalled");

    let settings = store.load().unwrap();
    assert_eq!(settings.ssid, "HomeNet");
    assert_eq!(settings.password.expose_secret(), "hunter 2");
    assert_eq!(settings.api_key().expose_secret(), "AIza123");
}

#[tokio::test]
async fn test_save_requires_key() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let app = portal::router(PortalState::new(store.clone()));

    let response = app.oneshot(save_request("ssid=HomeNet&pass=x&key=")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!store.path().exists());
}
