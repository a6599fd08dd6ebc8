//! Multi-tenant storage gateway: apps upload files into named buckets that
//! are backed by local disk, S3 or Dropbox, optionally sealed with AES-GCM and
//! replicated between buckets of the same app.

pub mod audit;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod providers;
pub mod routes;
pub mod services;
pub mod state;

pub use state::AppState;
