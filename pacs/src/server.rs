//! The server orchestrator:
//! accepts connections, bounds concurrency,
//! owns the shared index, storage and statistics,
//! and hands each session to a dedicated thread.
use snafu::{ResultExt, Snafu};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::{Config, ConfigError};
use crate::handlers;
use crate::index::MetadataIndex;
use crate::stats::ServerStats;
use crate::storage::Storage;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum ServeError {
    #[snafu(display("invalid configuration"))]
    Configuration { source: ConfigError },

    #[snafu(display("could not bind to port {}", port))]
    Bind {
        port: u16,
        source: std::io::Error,
    },

    #[snafu(display("could not create data directory {}", path))]
    CreateDataDirectory {
        path: String,
        source: std::io::Error,
    },
}

pub type Result<T, E = ServeError> = std::result::Result<T, E>;

/// State shared by every session of a running server.
pub(crate) struct ServerInner {
    pub(crate) config: Config,
    pub(crate) index: Mutex<MetadataIndex>,
    pub(crate) storage: Storage,
    pub(crate) stats: ServerStats,
    active_sessions: AtomicUsize,
    session_counter: AtomicU64,
}

/// The PACS server.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct PacsServer {
    inner: Arc<ServerInner>,
}

impl PacsServer {
    /// Validate the configuration and set up the shared state.
    pub fn new(config: Config) -> Result<PacsServer> {
        config.validate().context(ConfigurationSnafu)?;
        std::fs::create_dir_all(&config.data_directory).context(CreateDataDirectorySnafu {
            path: config.data_directory.display().to_string(),
        })?;
        let storage = Storage::new(config.data_directory.clone());
        Ok(PacsServer {
            inner: Arc::new(ServerInner {
                config,
                index: Mutex::new(MetadataIndex::new()),
                storage,
                stats: ServerStats::new(),
                active_sessions: AtomicUsize::new(0),
                session_counter: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn stats(&self) -> &ServerStats {
        &self.inner.stats
    }

    pub fn storage(&self) -> &Storage {
        &self.inner.storage
    }

    /// The metadata index.
    /// Queries against a running server should copy what they need
    /// and drop the guard promptly.
    pub fn index(&self) -> &Mutex<MetadataIndex> {
        &self.inner.index
    }

    /// Bind the configured port and serve until the listener fails.
    pub fn run(&self) -> Result<()> {
        let port = self.inner.config.port;
        let listener =
            TcpListener::bind(("0.0.0.0", port)).context(BindSnafu { port })?;
        tracing::info!(
            port,
            ae_title = self.inner.config.ae_title.as_str(),
            "listening for associations"
        );
        self.serve(listener);
        Ok(())
    }

    /// Serve connections from an existing listener.
    pub fn serve(&self, listener: TcpListener) {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => self.accept(stream),
                Err(e) => {
                    tracing::warn!("failed to accept connection: {}", e);
                }
            }
        }
    }

    fn accept(&self, stream: TcpStream) {
        let inner = Arc::clone(&self.inner);
        let active = inner.active_sessions.load(Ordering::Acquire);
        if active >= inner.config.max_concurrent_connections {
            // over the cap: close without answering any request
            tracing::warn!(
                active,
                "session limit reached, dropping incoming connection"
            );
            inner.stats.connection_failed();
            drop(stream);
            return;
        }
        inner.active_sessions.fetch_add(1, Ordering::AcqRel);
        inner.stats.connection_opened();
        let session_id = inner.session_counter.fetch_add(1, Ordering::Relaxed);

        std::thread::spawn(move || {
            let span = tracing::info_span!("session", id = session_id);
            let _entered = span.enter();
            handlers::run_session(&inner, stream, session_id);
            inner.active_sessions.fetch_sub(1, Ordering::AcqRel);
            inner.stats.connection_closed();
        });
    }
}
