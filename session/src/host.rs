//! The editor-side document model, as far as sessions need it.
//!
//! Sessions never own documents. Before every query the worker asks a
//! [`DocumentHost`] for the open documents and mirrors their content into
//! shadow files. Hosts whose document model lives on a single (UI) thread use
//! [`bridge`]: the worker's request is forwarded to that thread and answered
//! when the thread services it with [`HostPump`].

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};

use crate::promise::{QueryHandle, QueryOutcome};

/// Snapshot of one open editor document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenDocument {
    path: PathBuf,
    contents: Vec<u8>,
    modified: bool,
    revision: Option<u64>,
}

impl OpenDocument {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
            modified: false,
            revision: None,
        }
    }

    /// Mark the document as having unsaved edits.
    #[must_use]
    pub fn modified(mut self, modified: bool) -> Self {
        self.modified = modified;
        self
    }

    /// Attach the editor's revision counter, if the document has one.
    #[must_use]
    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = Some(revision);
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    #[must_use]
    pub fn revision(&self) -> Option<u64> {
        self.revision
    }
}

/// Answer to [`DocumentHost::request_documents`].
#[derive(Debug)]
pub enum DocumentsReply {
    Ready(Vec<OpenDocument>),
    /// Answered later by another thread. A dropped sender means nothing is
    /// open.
    Pending(oneshot::Receiver<Vec<OpenDocument>>),
}

/// Document model provided by the host editor.
pub trait DocumentHost: Send + Sync {
    /// Every document currently open in the editor.
    fn open_documents(&self) -> Vec<OpenDocument>;

    /// Ask for the open documents without waiting on another thread. Hosts
    /// answered elsewhere return [`DocumentsReply::Pending`] so the worker
    /// can give up on the answer when its queue shuts down.
    fn request_documents(&self) -> DocumentsReply {
        DocumentsReply::Ready(self.open_documents())
    }

    /// Write `contents` to `path`.
    fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        std::fs::write(path, contents)
    }
}

/// Host with nothing open; the tool reads every file from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDocuments;

impl DocumentHost for NoDocuments {
    fn open_documents(&self) -> Vec<OpenDocument> {
        Vec::new()
    }
}

/// Thread-safe set of open documents, for hosts that keep their buffers
/// behind a lock rather than on a dedicated thread.
#[derive(Debug, Default)]
pub struct DocumentSet {
    documents: Mutex<BTreeMap<PathBuf, OpenDocument>>,
}

impl DocumentSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `document`, replacing any previous snapshot of the same path.
    pub fn open(&self, document: OpenDocument) {
        let mut documents = self
            .documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        documents.insert(document.path.clone(), document);
    }

    /// Close `path`. Returns whether it was open.
    pub fn close(&self, path: &Path) -> bool {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
            .is_some()
    }
}

impl DocumentHost for DocumentSet {
    fn open_documents(&self) -> Vec<OpenDocument> {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

struct HostRequest {
    reply: oneshot::Sender<Vec<OpenDocument>>,
}

/// Worker-side end of a [`bridge`]. Each request is answered by the owning
/// thread through [`HostPump`].
pub struct HostBridge {
    requests: mpsc::UnboundedSender<HostRequest>,
}

/// Owning-thread end of a [`bridge`].
///
/// Dropping the pump makes every pending and future request answer with no
/// documents, which unblocks any waiting worker.
pub struct HostPump {
    requests: mpsc::UnboundedReceiver<HostRequest>,
}

/// Connect a worker-side [`HostBridge`] to a [`HostPump`] serviced by the
/// thread that owns the documents.
#[must_use]
pub fn bridge() -> (HostBridge, HostPump) {
    let (tx, rx) = mpsc::unbounded_channel();
    (HostBridge { requests: tx }, HostPump { requests: rx })
}

impl HostBridge {
    fn send_request(&self) -> Option<oneshot::Receiver<Vec<OpenDocument>>> {
        let (reply, answer) = oneshot::channel();
        if self.requests.send(HostRequest { reply }).is_err() {
            tracing::debug!("Document host pump is gone; treating all documents as closed");
            return None;
        }
        Some(answer)
    }
}

impl DocumentHost for HostBridge {
    /// Blocks until the owning thread answers. Panics when called from async
    /// code; queue workers go through `request_documents` instead.
    fn open_documents(&self) -> Vec<OpenDocument> {
        let Some(answer) = self.send_request() else {
            return Vec::new();
        };
        answer.blocking_recv().unwrap_or_else(|_| {
            tracing::debug!("Document host pump dropped a pending request");
            Vec::new()
        })
    }

    fn request_documents(&self) -> DocumentsReply {
        match self.send_request() {
            Some(answer) => DocumentsReply::Pending(answer),
            None => DocumentsReply::Ready(Vec::new()),
        }
    }
}

impl HostPump {
    /// Answer every request that is already waiting. Returns how many were
    /// answered.
    pub fn service_pending(
        &mut self,
        mut documents: impl FnMut() -> Vec<OpenDocument>,
    ) -> usize {
        let mut served = 0;
        while let Ok(request) = self.requests.try_recv() {
            let _ = request.reply.send(documents());
            served += 1;
        }
        served
    }

    /// Keep answering requests until `handle` resolves, and return its
    /// outcome.
    ///
    /// This is how the owning thread waits for a result without deadlocking
    /// against the worker's per-query refresh. Like [`QueryHandle::wait`] it
    /// must not be called from async code.
    pub fn pump_until<T>(
        &mut self,
        mut handle: QueryHandle<T>,
        mut documents: impl FnMut() -> Vec<OpenDocument>,
    ) -> io::Result<QueryOutcome<T>> {
        let runtime = tokio::runtime::Builder::new_current_thread().build()?;
        let requests = &mut self.requests;
        Ok(runtime.block_on(async {
            loop {
                tokio::select! {
                    outcome = &mut handle => return outcome,
                    Some(request) = requests.recv() => {
                        let _ = request.reply.send(documents());
                    }
                }
            }
        }))
    }
}
