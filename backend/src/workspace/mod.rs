//! Google Workspace API access used by the diagnostic tools.

mod client;

pub use client::{ActivityQuery, WorkspaceClient, WorkspaceConfig, WorkspaceError};
