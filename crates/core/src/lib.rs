//! Roadbook Core Library
//!
//! Document session and paging model for the roadbook viewer: a windowed
//! pager over the active document, the persisted scroll position and the
//! load state the presentation layer observes.
//!
//! # Example
//!
//! ```ignore
//! use roadbook_core::{DocumentSession, LoadState, RoadbookConfig};
//! use roadbook_render::{ContentHandle, PdfiumSource};
//!
//! let config = RoadbookConfig::from_env()?;
//! let session = DocumentSession::builder(config, || Box::new(PdfiumSource::new())).build()?;
//!
//! let states = session.subscribe();
//! session.load_document(ContentHandle::from_path("stage-3.pdf"))?;
//! for state in states {
//!     if let LoadState::Loaded { batch } = state {
//!         println!("pages {:?}", batch.range());
//!         break;
//!     }
//! }
//! session.shutdown();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod error;
pub mod pager;
pub mod scroll;
pub mod session;
pub mod state;
pub mod store;
pub mod window;

pub use config::{ConfigError, RoadbookConfig};
pub use error::{ErrorKind, PageError, SessionError};
pub use pager::{window_keys, LoadParams, PageBatch, PagerConfig, WindowKeys, WindowedPager};
pub use scroll::{ScrollLedger, ScrollPosition};
pub use session::{DocumentSession, SessionBuilder, SessionSnapshot, SourceFactory};
pub use state::LoadState;
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, StoreError, StoreOp};
pub use window::PageWindow;
