//! `DreamlinkServer` builder and server loop.
//!
//! This is the entry point for running the emulated back-end. It ties
//! together all the layers: the framed-TCP match service, the HTTP login
//! and content endpoints, and the shared registries behind them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dreamlink_session::{
    PlayerRegistry, RecordStore, SessionConfig, SessionRegistry, UserRegistry,
};
use dreamlink_transport::{FrameConfig, FrameTransport, Transport};
use tokio::sync::Mutex;
use warp::Filter;

use crate::handler::handle_connection;
use crate::{auth, content, files, DreamlinkError};

/// A static file served by the content-list endpoint.
#[derive(Debug, Clone)]
pub struct ContentFile {
    /// Name the client requests the file by.
    pub name: String,
    /// Legacy type tag shown in list responses.
    pub file_type: String,
    /// Legacy index shown in list responses.
    pub index: u32,
    /// Raw bytes, with or without the embedded 2-byte trailer.
    pub bytes: Vec<u8>,
}

/// Policy and environment knobs for the three services.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Auto-register a well-formed, unused user id at login.
    pub register_on_login: bool,

    /// Let a non-awake player overwrite their uploaded dream.
    pub allow_sleeping_overwrite: bool,

    /// Reset the player to awake when the client confirms its download.
    pub reset_on_finish: bool,

    /// Idle read timeout on match connections; expiry closes silently.
    pub read_timeout: Duration,

    /// Shared-secret basic-auth pair every content request must present.
    pub content_auth: (String, String),

    /// Host name handed out by service location for the content service.
    pub content_host: String,

    /// Extra service-location targets: request value → (service, host).
    /// These are pass-through credentials for services outside this
    /// process.
    pub external_services: Vec<(String, (String, String))>,

    /// Files served by the content-list endpoint.
    pub content_files: Vec<ContentFile>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            register_on_login: true,
            allow_sleeping_overwrite: false,
            reset_on_finish: true,
            read_timeout: Duration::from_secs(90),
            content_auth: ("dream".to_string(), "dream".to_string()),
            content_host: "dream.dreamlink.example".to_string(),
            external_services: Vec::new(),
            content_files: Vec::new(),
        }
    }
}

/// Shared server state passed to every connection task and HTTP handler.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks.
/// Interior mutability via `Mutex` where needed.
pub(crate) struct ServerState<S: RecordStore> {
    pub(crate) sessions: Mutex<SessionRegistry>,
    pub(crate) users: Mutex<UserRegistry<S>>,
    pub(crate) players: Mutex<PlayerRegistry<S>>,
    pub(crate) config: ServerConfig,
}

/// Builder for configuring and starting a Dreamlink server.
///
/// # Example
///
/// ```rust,ignore
/// let server = DreamlinkServer::builder()
///     .bind_match("0.0.0.0:29900")
///     .bind_http("0.0.0.0:8880")
///     .build(MemoryStore::new())
///     .await?;
/// server.run().await
/// ```
pub struct DreamlinkServerBuilder {
    match_addr: String,
    http_addr: SocketAddr,
    session_config: SessionConfig,
    server_config: ServerConfig,
}

impl DreamlinkServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            match_addr: "127.0.0.1:29900".to_string(),
            http_addr: ([127, 0, 0, 1], 8880).into(),
            session_config: SessionConfig::default(),
            server_config: ServerConfig::default(),
        }
    }

    /// Sets the address of the binary-TCP match service.
    pub fn bind_match(mut self, addr: &str) -> Self {
        self.match_addr = addr.to_string();
        self
    }

    /// Sets the address of the HTTP services (login, content list,
    /// session-gated content exchange).
    pub fn bind_http(mut self, addr: SocketAddr) -> Self {
        self.http_addr = addr;
        self
    }

    /// Sets the session configuration.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Sets the server policy configuration.
    pub fn server_config(mut self, config: ServerConfig) -> Self {
        self.server_config = config;
        self
    }

    /// Builds the server on top of the given record store.
    ///
    /// The store is shared by the user and player registries; everything
    /// else is constructed fresh, so two servers never share state unless
    /// they share a store.
    pub async fn build<S: RecordStore>(
        self,
        store: S,
    ) -> Result<DreamlinkServer<S>, DreamlinkError> {
        let frame_config = FrameConfig {
            terminator: dreamlink_protocol::TERMINATOR,
            ..FrameConfig::default()
        };
        let transport = FrameTransport::bind(&self.match_addr, frame_config).await?;

        let store = Arc::new(store);
        let state = Arc::new(ServerState {
            sessions: Mutex::new(SessionRegistry::new(self.session_config)),
            users: Mutex::new(UserRegistry::new(Arc::clone(&store))),
            players: Mutex::new(PlayerRegistry::new(store)),
            config: self.server_config,
        });

        let routes = auth::route(Arc::clone(&state))
            .or(files::route(Arc::clone(&state)))
            .or(content::routes(Arc::clone(&state)));
        let (http_addr, http_server) = warp::serve(routes)
            .try_bind_ephemeral(self.http_addr)
            .map_err(|e| DreamlinkError::HttpBind(e.to_string()))?;
        tracing::info!(%http_addr, "http services listening");

        Ok(DreamlinkServer {
            transport,
            http_addr,
            http_server: Box::pin(http_server),
            state,
        })
    }
}

impl Default for DreamlinkServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running Dreamlink server.
///
/// Call [`run()`](Self::run) to start serving.
pub struct DreamlinkServer<S: RecordStore> {
    transport: FrameTransport,
    http_addr: SocketAddr,
    http_server: std::pin::Pin<Box<dyn Future<Output = ()> + Send>>,
    state: Arc<ServerState<Arc<S>>>,
}

impl<S: RecordStore> DreamlinkServer<S> {
    /// Creates a new builder.
    pub fn builder() -> DreamlinkServerBuilder {
        DreamlinkServerBuilder::new()
    }

    /// Returns the local address of the match service.
    pub fn match_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Returns the local address of the HTTP services.
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    /// Runs the accept loop and the HTTP services.
    ///
    /// Accepts incoming match connections and spawns a handler task for
    /// each. Runs until the process is terminated.
    pub async fn run(self) -> Result<(), DreamlinkError> {
        tracing::info!("dreamlink server running");

        let Self {
            mut transport,
            http_server,
            state,
            ..
        } = self;

        let accept_loop = async move {
            loop {
                match transport.accept().await {
                    Ok(conn) => {
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            handle_connection(conn, state).await;
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                }
            }
        };

        tokio::join!(http_server, accept_loop);
        Ok(())
    }
}
