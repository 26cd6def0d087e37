//! Sessions against an interactive Haskell analysis tool (`ghc-mod` in
//! legacy-interactive mode).
//!
//! A [`SessionRegistry`] maps project roots to [`QueryQueue`]s. Each queue
//! owns one lazily started tool process and a shadow file cache of the
//! editor's unsaved documents, and runs symbol and type queries one at a time
//! on its own worker thread.

pub mod cache;
pub mod codec;
pub mod config;
pub mod host;
pub mod promise;
pub mod tool;
pub mod types;

pub(crate) mod protocol;

mod queue;
mod registry;

pub use cache::{CacheUpdate, ShadowFileCache};
pub use config::{ConfigError, ToolSettings, config_path};
pub use host::{
    DocumentHost, DocumentSet, DocumentsReply, HostBridge, HostPump, NoDocuments, OpenDocument,
    bridge,
};
pub use promise::{CancelToken, QueryHandle, QueryOutcome};
pub use queue::QueryQueue;
pub use registry::{SessionRegistry, find_project_root};
pub use tool::ToolSession;
pub use types::{FileMap, Query, SymbolInfo, ToolConfig, ToolError, format_hover};
