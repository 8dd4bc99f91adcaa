//! Static configuration: app catalog and stage prompt text.

mod apps;
pub mod prompts;

pub use apps::{resolve_app, AppEntry, APP_CATALOG};
