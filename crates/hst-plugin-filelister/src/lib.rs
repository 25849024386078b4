//! Reference worker: lists directories through the host's sandbox.
//!
//! The worker never touches its own filesystem. Every listing is a
//! `read_dir` call on the reverse host-service connection, so the result is
//! confined to whatever root the host exposes.

use hst_broker::CallContext;
use hst_hostserve::{HostServiceClient, RemoteDirEntry};
use hst_plugins::{FileLister, ListingError};
use tracing::debug;

const LISTER_TARGET: &str = "hst_plugin_filelister";

/// Lists directories by delegating to host services.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostFileLister;

impl FileLister for HostFileLister {
    fn list(
        &self,
        ctx: &CallContext,
        host: Option<&HostServiceClient>,
        directory: &str,
    ) -> Result<Vec<String>, ListingError> {
        let client = host.ok_or(ListingError::HostUnavailable)?;
        let entries = client.read_dir(ctx, directory)?;
        debug!(
            target: LISTER_TARGET,
            directory,
            entries = entries.len(),
            client_id = %client.client_id(),
            "directory listed"
        );
        Ok(render(entries))
    }
}

/// Renders entries as sorted names, marking directories with a trailing `/`.
#[must_use]
pub fn render(entries: Vec<RemoteDirEntry>) -> Vec<String> {
    let mut names: Vec<String> = entries
        .into_iter()
        .map(|entry| {
            if entry.is_dir() {
                format!("{}/", entry.name())
            } else {
                entry.name().to_owned()
            }
        })
        .collect();
    names.sort_unstable();
    names
}
