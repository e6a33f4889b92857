//! Configuration portal
//!
//! A one-page HTTP form for Wi-Fi credentials and the assistant API key.
//! Saving persists the settings and signals the device to restart.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tower_http::trace::TraceLayer;

use crate::config::{DeviceSettings, SettingsStore};
use crate::{Error, Result};

const FORM_PAGE: &str = "<!DOCTYPE html>\
<html><head><meta name='viewport' content='width=device-width, initial-scale=1'>\
<title>Parley setup</title></head><body>\
<h2>Parley setup</h2>\
<form method='POST' action='/save'>\
SSID:<br><input type='text' name='ssid' maxlength='63'><br>\
Password:<br><input type='password' name='pass' maxlength='63'><br>\
Gemini Key:<br><input type='text' name='key' maxlength='79'><br><br>\
<input type='submit' value='Save'>\
</form></body></html>";

const SAVED_PAGE: &str = "<html><body><h3>Saved. Restarting...</h3></body></html>";

/// Submitted portal form
#[derive(Debug, Deserialize)]
pub struct PortalForm {
    /// Network name
    #[serde(default)]
    pub ssid: String,

    /// Network password
    #[serde(default)]
    pub pass: String,

    /// Assistant API key
    #[serde(default)]
    pub key: String,
}

/// Shared portal state
#[derive(Clone)]
pub struct PortalState {
    store: SettingsStore,
    saved: Arc<Notify>,
}

impl PortalState {
    /// Create state persisting to `store`
    #[must_use]
    pub fn new(store: SettingsStore) -> Self {
        Self {
            store,
            saved: Arc::new(Notify::new()),
        }
    }

    /// Resolves once settings have been saved
    pub async fn restart_requested(&self) {
        self.saved.notified().await;
    }
}

/// Build the portal router
pub fn router(state: PortalState) -> Router {
    Router::new()
        .route("/", get(form_page))
        .route("/save", post(save))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn form_page() -> Html<&'static str> {
    Html(FORM_PAGE)
}

async fn save(State(state): State<PortalState>, Form(form): Form<PortalForm>) -> Response {
    let key = form.key.trim();
    if key.is_empty() {
        return (StatusCode::BAD_REQUEST, "API key required").into_response();
    }

    let settings = DeviceSettings::new(form.ssid.trim().to_string(), form.pass, key.to_string());

    let store = state.store.clone();
    let saved = tokio::task::spawn_blocking(move || store.save(&settings)).await;

    match saved {
        Ok(Ok(())) => {
            tracing::info!(ssid = %form.ssid.trim(), "settings saved, key=[hidden]");
            state.saved.notify_one();
            Html(SAVED_PAGE).into_response()
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "failed to save settings");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to save settings").into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "settings task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to save settings").into_response()
        }
    }
}

/// Serve the portal until settings are saved
///
/// # Errors
///
/// Returns error if the listener cannot bind or the server fails
pub async fn serve(bind: SocketAddr, store: SettingsStore) -> Result<()> {
    let state = PortalState::new(store);
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|e| Error::Portal(format!("failed to bind portal: {e}")))?;

    tracing::info!(addr = %bind, "configuration portal listening");

    let shutdown = state.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.restart_requested().await })
        .await
        .map_err(|e| Error::Portal(format!("portal server error: {e}")))?;

    tracing::info!("configuration saved, restarting");
    Ok(())
}
