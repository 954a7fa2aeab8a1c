//! Core server: accepts connections and drives each one through its
//! lifecycle.
//!
//! Owns the token service, the connection registry, presence broadcaster and
//! message router, plus the account store behind the auth HTTP API.

use crate::auth::api::{self, AuthApiState};
use crate::auth::{AccountStore, LoginRateLimiter};
use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::gatekeeper::Gatekeeper;
use crate::presence::PresenceBroadcaster;
use crate::registry::{ConnHandle, ConnectionRegistry, Outbound};
use crate::router::MessageRouter;
use crate::transport::websocket::{self, ListenerOptions, WebSocketConnection};
use murmur_core::{
    decode_envelope, encode, generate_secret, HmacTokenService, Notice, RelayError, RelayResult,
    RouteError, TokenService,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Error text sent to a connection displaced by a newer login.
const SESSION_REPLACED: &str = "session replaced";

/// How long shutdown waits for connection tasks to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The murmur relay server instance.
pub struct RelayServer {
    config: ServerConfig,
    tokens: Arc<dyn TokenService>,
    gatekeeper: Arc<Gatekeeper>,
    registry: Arc<ConnectionRegistry>,
    presence: PresenceBroadcaster,
    router: MessageRouter,
    accounts: Arc<AccountStore>,
    login_limiter: Arc<Mutex<LoginRateLimiter>>,
    /// Latched shutdown flag, observed by `serve` and every connection task.
    shutdown_tx: watch::Sender<bool>,
}

impl RelayServer {
    /// Create a new server instance.
    pub fn new(config: ServerConfig) -> RelayResult<Self> {
        let secret = match &config.secret {
            Some(secret) => secret.clone(),
            None => {
                warn!("no auth.secret configured, tokens will not survive a restart");
                generate_secret()?
            }
        };
        let tokens: Arc<dyn TokenService> = Arc::new(HmacTokenService::new(&secret));
        Ok(Self::with_token_service(config, tokens))
    }

    /// Create a server around an existing token service.
    pub fn with_token_service(config: ServerConfig, tokens: Arc<dyn TokenService>) -> Self {
        let gatekeeper = Arc::new(Gatekeeper::new(tokens.clone(), config.cookie_name.clone()));
        let registry = Arc::new(ConnectionRegistry::new());
        let presence = PresenceBroadcaster::new(registry.clone());
        let router = MessageRouter::new(registry.clone());
        let accounts = Arc::new(AccountStore::new(tokens.clone(), config.token_ttl));
        let login_limiter = Arc::new(Mutex::new(LoginRateLimiter::new(
            config.login_attempts_per_minute,
            60,
        )));

        Self {
            config,
            tokens,
            gatekeeper,
            registry,
            presence,
            router,
            accounts,
            login_limiter,
            shutdown_tx: watch::channel(false).0,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn accounts(&self) -> &Arc<AccountStore> {
        &self.accounts
    }

    pub fn token_service(&self) -> &Arc<dyn TokenService> {
        &self.tokens
    }

    /// Tell every live connection to close. `serve` returns once they have
    /// finished or the grace period runs out.
    pub fn shutdown(&self) {
        info!("broadcasting shutdown to connected clients");
        self.shutdown_tx.send_replace(true);
    }

    /// Bind both listeners from config and serve until they close.
    pub async fn run(self: Arc<Self>) -> RelayResult<()> {
        let http_addr = SocketAddr::new(self.config.bind, self.config.port);
        let ws_addr = SocketAddr::new(self.config.bind, self.config.ws_port);

        let http_listener = TcpListener::bind(http_addr)
            .await
            .map_err(|e| RelayError::Transport(format!("HTTP bind {http_addr} failed: {e}")))?;
        let ws_listener = TcpListener::bind(ws_addr)
            .await
            .map_err(|e| RelayError::Transport(format!("WS bind {ws_addr} failed: {e}")))?;

        self.serve(http_listener, ws_listener).await
    }

    /// Serve the auth API and the relay on already-bound listeners until
    /// [`RelayServer::shutdown`] is called or the relay listener closes.
    pub async fn serve(
        self: Arc<Self>,
        http_listener: TcpListener,
        ws_listener: TcpListener,
    ) -> RelayResult<()> {
        let http_addr = http_listener.local_addr()?;
        let ws_addr = ws_listener.local_addr()?;

        let mut ws_rx = websocket::start_listener(
            ws_listener,
            ListenerOptions {
                path: self.config.ws_path.clone(),
                max_frame_size: self.config.max_frame_size,
            },
        )?;

        let app = api::router(AuthApiState {
            accounts: self.accounts.clone(),
            gatekeeper: self.gatekeeper.clone(),
            login_limiter: self.login_limiter.clone(),
        });
        let http_task = tokio::spawn(async move {
            axum::serve(
                http_listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
        });

        // Rate limiter GC
        let gc_limiter = self.login_limiter.clone();
        let gc_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let mut limiter = gc_limiter.lock().await;
                limiter.gc();
                debug!(tracked = limiter.tracked(), "login limiter gc");
            }
        });

        info!(
            http = %http_addr,
            ws = %ws_addr,
            ws_path = %self.config.ws_path,
            "murmur-server ready"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = stopped(&mut shutdown_rx) => break,

                accepted = ws_rx.recv() => {
                    let Some(ws_conn) = accepted else {
                        info!("relay listener closed, shutting down");
                        self.shutdown();
                        break;
                    };
                    let srv = self.clone();
                    connections.spawn(async move {
                        let remote = ws_conn.remote_addr;
                        if let Err(e) = srv.handle_websocket(ws_conn).await {
                            warn!(remote = %remote, error = %e, "WebSocket connection error");
                        }
                    });
                }

                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        http_task.abort();
        gc_task.abort();

        info!(pending = connections.len(), "draining connections");
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = connections.len(),
                "connections still open after grace period, aborting"
            );
            connections.shutdown().await;
        }
        Ok(())
    }

    /// Drive one upgraded connection from authentication to close.
    async fn handle_websocket(&self, mut conn: WebSocketConnection) -> RelayResult<()> {
        let mut lifecycle = Connection::new(conn.remote_addr);
        lifecycle.begin_auth()?;

        let identity = match self.gatekeeper.admit(&conn.headers) {
            Ok(identity) => identity,
            Err(e) => {
                info!(
                    remote = %conn.remote_addr,
                    reason = %e.reason(),
                    "connection refused"
                );
                let refusal = encode(&Notice::error(e.to_string()))?;
                let _ = websocket::ws_send_text(&mut conn.ws_stream, refusal).await;
                websocket::ws_close(&mut conn.ws_stream).await;
                lifecycle.close()?;
                return Ok(());
            }
        };

        let (tx, rx) = mpsc::channel::<Outbound>(self.config.outbound_buffer);
        let admission = self.registry.admit(&identity.username, tx).await;
        if let Some(previous) = admission.evicted {
            previous.supersede();
        }
        lifecycle.go_online(&identity.username, admission.handle.id)?;
        info!(
            remote = %conn.remote_addr,
            username = %identity.username,
            conn_id = admission.handle.id,
            "ws connect"
        );
        self.presence.broadcast().await;

        let result = self.session_loop_ws(&mut conn, &admission.handle, rx).await;

        lifecycle.close()?;
        if self
            .registry
            .remove_connection(&admission.handle.username, admission.handle.id)
            .await
        {
            self.presence.broadcast().await;
        }
        info!(
            remote = %conn.remote_addr,
            username = %admission.handle.username,
            conn_id = admission.handle.id,
            connected_secs = admission.handle.admitted_at.elapsed().as_secs(),
            "ws disconnect"
        );

        result
    }

    async fn session_loop_ws(
        &self,
        conn: &mut WebSocketConnection,
        handle: &ConnHandle,
        mut rx: mpsc::Receiver<Outbound>,
    ) -> RelayResult<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown_rx) => {
                    debug!(username = %handle.username, "shutdown signal received, closing connection");
                    websocket::ws_close(&mut conn.ws_stream).await;
                    break;
                }

                _ = handle.superseded() => {
                    info!(username = %handle.username, conn_id = handle.id, "connection superseded");
                    let text = encode(&Notice::error(SESSION_REPLACED))?;
                    let _ = websocket::ws_send_text(&mut conn.ws_stream, text).await;
                    websocket::ws_close(&mut conn.ws_stream).await;
                    break;
                }

                outbound = rx.recv() => {
                    let text = match outbound {
                        Some(Outbound::Deliver(envelope)) => encode(&envelope)?,
                        Some(Outbound::Notice(notice)) => encode(&notice)?,
                        None => break,
                    };
                    if let Err(e) = websocket::ws_send_text(&mut conn.ws_stream, text).await {
                        debug!(username = %handle.username, error = %e, "WebSocket session ended");
                        break;
                    }
                }

                frame = websocket::ws_recv_frame(&mut conn.ws_stream) => {
                    match frame {
                        Ok(Some(data)) => {
                            if let Some(reply) = self.dispatch_frame(&data, &handle.username).await {
                                websocket::ws_send_text(&mut conn.ws_stream, encode(&reply)?).await?;
                            }
                        }
                        Ok(None) => {
                            debug!(username = %handle.username, "WebSocket session ended (peer closed)");
                            break;
                        }
                        Err(e) => {
                            debug!(username = %handle.username, error = %e, "WebSocket session ended");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Decode and route one inbound frame. Returns a notice for the sender,
    /// if any.
    async fn dispatch_frame(&self, data: &[u8], sender: &str) -> Option<Notice> {
        let envelope = match decode_envelope(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(username = %sender, error = %e, "invalid ws message");
                return None;
            }
        };

        match self.router.route(envelope, sender).await {
            Ok(()) => None,
            Err(e @ RouteError::RecipientOffline(_)) => Some(Notice::delivery_failed(e.to_string())),
            Err(RouteError::RecipientBusy(_)) => None,
        }
    }
}

/// Resolves once the shutdown flag is set (or its sender is gone).
async fn stopped(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> RelayServer {
        RelayServer::new(ServerConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn dispatch_reports_offline_recipient() {
        let srv = server();
        let reply = srv
            .dispatch_frame(br#"{"type":"encrypted","to":"bob","payload":"Y"}"#, "alice")
            .await;
        assert_eq!(reply, Some(Notice::delivery_failed("bob offline")));
    }

    #[tokio::test]
    async fn dispatch_ignores_malformed_frames() {
        let srv = server();
        assert_eq!(srv.dispatch_frame(b"{not json", "alice").await, None);
        assert_eq!(srv.dispatch_frame(br#"{"type":"encrypted"}"#, "alice").await, None);
        assert!(srv.registry().is_empty().await);
    }

    #[tokio::test]
    async fn dispatch_forwards_silently() {
        let srv = server();
        let (tx, mut rx) = mpsc::channel(4);
        srv.registry().admit("bob", tx).await;

        let reply = srv
            .dispatch_frame(
                br#"{"type":"encrypted","to":"bob","payload":"X","from":"mallory"}"#,
                "alice",
            )
            .await;
        assert_eq!(reply, None);

        let Some(Outbound::Deliver(env)) = rx.recv().await else {
            panic!("expected forwarded envelope");
        };
        assert_eq!(env.from.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn configured_secret_is_used() {
        let config = ServerConfig {
            secret: Some(vec![7u8; 32]),
            ..ServerConfig::default()
        };
        let a = RelayServer::new(config.clone()).unwrap();
        let b = RelayServer::new(config).unwrap();
        let token = a.token_service().issue_for("alice", 60);
        assert_eq!(
            b.token_service().validate(token.as_str()).unwrap().username,
            "alice"
        );
    }
}
