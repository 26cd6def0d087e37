//! Serialized query queue with a dedicated worker thread.
//!
//! Every [`QueryQueue`] owns a [`ToolSession`] and a [`ShadowFileCache`] that
//! only its worker touches. Callers on any thread enqueue queries and get a
//! [`QueryHandle`] back immediately; the worker runs them strictly in enqueue
//! order, refreshing the shadow files before each one.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use tokio::sync::{Notify, watch};

use crate::cache::ShadowFileCache;
use crate::config::ToolSettings;
use crate::host::{DocumentHost, DocumentsReply, OpenDocument};
use crate::promise::{Completer, QueryHandle, promise};
use crate::protocol;
use crate::tool::ToolSession;
use crate::types::{Query, SymbolInfo, ToolError};

enum Reply {
    Symbol(Completer<SymbolInfo>),
    Type(Completer<String>),
}

impl Reply {
    fn is_cancelled(&self) -> bool {
        match self {
            Reply::Symbol(completer) => completer.is_cancelled(),
            Reply::Type(completer) => completer.is_cancelled(),
        }
    }

    /// Parse `payload` for the caller. Returns false if nobody is listening.
    fn deliver(self, payload: Result<Vec<u8>, ToolError>) -> bool {
        match self {
            Reply::Symbol(completer) => {
                completer.complete(payload.and_then(|p| protocol::parse_symbol_info(&p)))
            }
            Reply::Type(completer) => {
                completer.complete(payload.and_then(|p| protocol::parse_type_info(&p)))
            }
        }
    }
}

struct Operation {
    query: Query,
    reply: Reply,
}

#[derive(Default)]
struct Pending {
    operations: VecDeque<Operation>,
    /// Set once the queue is dropped or its worker failed to start; new
    /// operations are cancelled on arrival.
    closed: bool,
}

struct Shared {
    pending: Mutex<Pending>,
    wake: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close the queue and cancel everything not yet started.
    fn close(&self) -> usize {
        let drained = {
            let mut pending = self.lock();
            pending.closed = true;
            std::mem::take(&mut pending.operations)
        };
        // Dropping the completers resolves their handles as cancelled.
        drained.len()
    }
}

/// FIFO of queries against one project's tool process.
pub struct QueryQueue {
    root: PathBuf,
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl QueryQueue {
    /// Create the queue and start its worker thread. The tool process itself
    /// is started by the first query.
    pub fn new(
        root: impl Into<PathBuf>,
        settings: Arc<ToolSettings>,
        host: Arc<dyn DocumentHost>,
    ) -> io::Result<Self> {
        let root = root.into();
        let cache = ShadowFileCache::new(&settings.snapshot().cache_prefix, &root)?;
        let session = ToolSession::new(root.clone(), settings);
        let shared = Arc::new(Shared {
            pending: Mutex::new(Pending::default()),
            wake: Notify::new(),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = Worker {
            shared: Arc::clone(&shared),
            session,
            cache,
            host,
            shutdown_rx,
        };
        let handle = thread::Builder::new()
            .name("modquery-worker".to_string())
            .spawn(move || worker.run_on_thread())?;

        tracing::debug!("Query queue started for {}", root.display());
        Ok(Self {
            root,
            shared,
            shutdown_tx,
            worker: Some(handle),
        })
    }

    /// Project root this queue serves (empty for files outside any project).
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Look up `symbol` as seen from `file`.
    pub fn find_symbol(
        &self,
        file: impl Into<PathBuf>,
        symbol: impl Into<String>,
    ) -> QueryHandle<SymbolInfo> {
        let (completer, handle) = promise();
        let query = Query::FindSymbol {
            file: file.into(),
            symbol: symbol.into(),
        };
        self.enqueue(query, Reply::Symbol(completer));
        handle
    }

    /// Type of the expression at `line` (1-based), `col` (0-based) in `file`.
    pub fn type_at(&self, file: impl Into<PathBuf>, line: u32, col: u32) -> QueryHandle<String> {
        let (completer, handle) = promise();
        let query = Query::TypeAt {
            file: file.into(),
            line,
            col,
        };
        self.enqueue(query, Reply::Type(completer));
        handle
    }

    /// Queries waiting for the worker, not counting one in flight.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.shared.lock().operations.len()
    }

    fn enqueue(&self, query: Query, reply: Reply) {
        {
            let mut pending = self.shared.lock();
            if pending.closed {
                tracing::debug!("Queue for {} is closed, cancelling query", self.root.display());
                return;
            }
            pending.operations.push_back(Operation { query, reply });
        }
        self.shared.wake.notify_one();
    }
}

impl Drop for QueryQueue {
    fn drop(&mut self) {
        let cancelled = self.shared.close();
        let _ = self.shutdown_tx.send(true);
        self.shared.wake.notify_one();

        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::warn!("Query worker for {} panicked", self.root.display());
        }
        tracing::debug!(
            "Query queue for {} stopped ({cancelled} pending cancelled)",
            self.root.display()
        );
    }
}

struct Worker {
    shared: Arc<Shared>,
    session: ToolSession,
    cache: ShadowFileCache,
    host: Arc<dyn DocumentHost>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Worker {
    fn run_on_thread(self) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::warn!("Failed to build query worker runtime: {e}");
                self.shared.close();
                return;
            }
        };
        runtime.block_on(self.run());
    }

    async fn run(mut self) {
        while let Some(operation) = self.next().await {
            if operation.reply.is_cancelled() {
                tracing::trace!("Skipping cancelled query: {}", operation.query.command());
                continue;
            }

            // The tool must never see a file map older than the query.
            let Some(documents) = self.open_documents().await else {
                break;
            };
            self.cache.apply(documents, self.host.as_ref());
            if operation.reply.is_cancelled() {
                continue;
            }
            self.session.set_file_map(self.cache.file_map()).await;

            let command = operation.query.command();
            tokio::select! {
                result = self.session.run_query(&command) => {
                    if !operation.reply.deliver(result) {
                        tracing::trace!("Discarded result of cancelled query: {command}");
                    }
                }
                _ = self.shutdown_rx.changed() => break,
            }
        }
        self.session.shutdown().await;
    }

    /// Open documents from the host, or `None` if the queue shut down while
    /// the host's thread had yet to answer.
    async fn open_documents(&mut self) -> Option<Vec<OpenDocument>> {
        match self.host.request_documents() {
            DocumentsReply::Ready(documents) => Some(documents),
            DocumentsReply::Pending(answer) => tokio::select! {
                answer = answer => Some(answer.unwrap_or_default()),
                _ = self.shutdown_rx.changed() => None,
            },
        }
    }

    async fn next(&mut self) -> Option<Operation> {
        loop {
            {
                let mut pending = self.shared.lock();
                if pending.closed {
                    return None;
                }
                if let Some(operation) = pending.operations.pop_front() {
                    return Some(operation);
                }
            }
            tokio::select! {
                () = self.shared.wake.notified() => {}
                _ = self.shutdown_rx.changed() => return None,
            }
        }
    }
}
