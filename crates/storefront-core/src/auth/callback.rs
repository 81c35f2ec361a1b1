//! Loopback listener for the identity provider's login redirect.
//!
//! The browser is sent back to the configured redirect URI after sign-in.
//! When that URI points at this machine, [`CallbackListener`] accepts the
//! one request carrying `code` and `state` and hands back the full callback
//! URL for [`SessionManager::complete_login`](super::SessionManager::complete_login).

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{RawQuery, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::error::IdentityError;

/// Time the server gets to close open browser connections after the callback
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const LANDING_PAGE: &str =
    "<!doctype html><html><body><p>Login complete, you can close this tab.</p></body></html>";

pub struct CallbackListener {
    listener: TcpListener,
    redirect_uri: Url,
}

impl CallbackListener {
    /// Listen on the host and port of `redirect_uri`.
    pub async fn bind(redirect_uri: &Url) -> Result<Self, IdentityError> {
        if redirect_uri.scheme() != "http" {
            return Err(IdentityError::Configuration(format!(
                "login callback needs a plain http redirect URI, got {}",
                redirect_uri
            )));
        }

        let addrs = redirect_uri.socket_addrs(|| None).map_err(|e| {
            IdentityError::Configuration(format!("cannot resolve {}: {}", redirect_uri, e))
        })?;
        let listener = TcpListener::bind(&addrs[..]).await.map_err(|e| {
            IdentityError::Configuration(format!("cannot listen on {}: {}", redirect_uri, e))
        })?;

        let mut redirect_uri = redirect_uri.clone();
        // An ephemeral port (0) is replaced by the one actually bound
        if let Ok(addr) = listener.local_addr() {
            if redirect_uri.port_or_known_default() == Some(0) {
                let _ = redirect_uri.set_port(Some(addr.port()));
            }
        }

        debug!(redirect_uri = %redirect_uri, "Login callback listener bound");
        Ok(Self {
            listener,
            redirect_uri,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    /// Serve until the first request on the redirect path arrives, then shut
    /// down and return the callback URL with its query.
    pub async fn wait(self, timeout: Duration) -> Result<Url, IdentityError> {
        let (tx, mut rx) = mpsc::channel::<Option<String>>(1);
        let app = Router::new()
            .route(self.redirect_uri.path(), get(receive))
            .with_state(tx);

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let listener = self.listener;
        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });

        let received = tokio::time::timeout(timeout, rx.recv()).await;

        shutdown.cancel();
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
            Ok(Ok(Err(e))) => warn!(error = %e, "Login callback server failed"),
            Ok(_) => {}
            Err(_) => server.abort(),
        }

        match received {
            Ok(Some(query)) => {
                info!("Login callback received");
                let mut callback = self.redirect_uri;
                callback.set_query(query.as_deref());
                Ok(callback)
            }
            Ok(None) => Err(IdentityError::LoginFailed(
                "login callback listener stopped".to_string(),
            )),
            Err(_) => Err(IdentityError::LoginFailed(format!(
                "no login callback within {}s",
                timeout.as_secs()
            ))),
        }
    }
}

async fn receive(
    State(tx): State<mpsc::Sender<Option<String>>>,
    RawQuery(query): RawQuery,
) -> Html<&'static str> {
    if tx.try_send(query).is_err() {
        debug!("Duplicate login callback ignored");
    }
    Html(LANDING_PAGE)
}
