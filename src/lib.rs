//! pixd - backend for a 5-dimensional scientific-image pixel store.
//!
//! Clients create, populate, retrieve, convert and analyze 5-axis
//! (X, Y, Z, Channel, Time) pixel arrays and associated opaque files,
//! addressed by 64-bit object identifiers. Requests arrive as a flat list
//! of name/value parameters - identical from the command line or an HTTP/CGI
//! gateway - and produce either text records or a streamed binary payload.
//!
//! # Layout
//!
//! The core is the request dispatcher: method resolution ([`method`]),
//! per-opcode parameter contracts ([`request`]), the 5-axis addressing
//! scheme ([`geometry`]), response framing ([`response`]) and uniform
//! failure reporting ([`report`]), all tied together by [`dispatch`]. The
//! storage engine and file repository sit behind the traits in [`engine`],
//! with filesystem implementations in [`pixels`] and [`files`].
//!
//! # Example
//!
//! ```rust,ignore
//! use pixd::{Dispatcher, FsFileStore, FsPixelEngine, Params, ResponseWriter};
//!
//! # async fn example(config: &pixd::ServerConfig) {
//! let engine = FsPixelEngine::new(&config.root);
//! let files = FsFileStore::new(&config.root);
//! let sink = pixd::StderrSink;
//! let dispatcher = Dispatcher::new(&engine, &files, &sink, config);
//!
//! let params = Params::from_pairs([("Method", "NewPixels"), ("Dims", "64,64,5,2,1,2")]);
//! let mut out = ResponseWriter::new(tokio::io::stdout(), config.interactive);
//! let exit = dispatcher.dispatch(&params, &mut tokio::io::empty(), &mut out).await;
//! # let _ = exit;
//! # }
//! ```

pub mod archive;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod files;
pub mod geometry;
pub mod markup;
pub mod method;
pub mod params;
pub mod pixels;
pub mod report;
pub mod request;
pub mod response;
pub mod stats;
pub mod tiff;
pub mod transport;
pub mod types;

// Re-exports
pub use config::{Args, ServerConfig};
pub use dispatch::Dispatcher;
pub use engine::{FileHandle, FileStore, PixelEngine, PixelsHandle};
pub use error::{PixError, Result};
pub use files::FsFileStore;
pub use geometry::{Coord, PixelShape, PixelSpan, Region};
pub use method::{Access, Method};
pub use params::Params;
pub use pixels::FsPixelEngine;
pub use report::{ErrorSink, StderrSink};
pub use response::ResponseWriter;
pub use types::{ObjectId, PixelHeader, SampleType};

/// Version of the pixel-store backend
pub const PIXD_VERSION: &str = env!("CARGO_PKG_VERSION");
