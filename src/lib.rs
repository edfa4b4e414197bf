pub mod backfill;
pub mod classify;
pub mod config;
pub mod context;
pub mod imap;
pub mod index;
pub mod live;
pub mod message;
pub mod normalizer;
pub mod notify;
pub mod pipeline;
pub mod sync;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export the types most callers need
pub use config::Config;
pub use message::{Email, EmailAccount, EmailCategory, SearchQuery};
pub use pipeline::Pipeline;
pub use sync::{ConnectionState, SyncEngine, SyncSettings};
