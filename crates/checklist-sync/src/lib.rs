pub mod backup;
pub mod checklist;
pub mod config;
pub mod credentials;
pub mod debounce;
pub mod error;
pub mod fallback;
pub mod kv;
pub mod reconciler;
pub mod record;
pub mod remote;
pub mod repl;
pub mod session;
pub mod status;

pub use error::{Error, Result};
