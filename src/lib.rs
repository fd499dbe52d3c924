pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod protocol;
pub mod qr;
pub mod redirect;
pub mod server;
pub mod storage;
pub mod telemetry;

pub use error::{AppError, RedirectError};
pub use protocol::{HttpParser, Request, Response};
pub use redirect::{Redirect, RedirectRequest, RedirectService};
pub use server::Handler;
pub use storage::{Buckets, KeyValueStore, StorageBackend, StorageError, StorageFactory};
