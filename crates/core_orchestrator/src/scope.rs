use std::sync::Arc;

use core_types::ActiveFlow;
use tokio::sync::watch;
use tracing::debug;

use crate::files::FileCollectionClient;

/// Re-runs the file panel's fetches whenever the active flow changes.
///
/// Each reaction runs as its own task so a slow listing for an old scope
/// never delays the new one; stale results are discarded by the file client.
pub struct ScopeCoordinator {
    files: Arc<FileCollectionClient>,
    scope: watch::Receiver<ActiveFlow>,
}

impl ScopeCoordinator {
    pub fn new(files: Arc<FileCollectionClient>, scope: watch::Receiver<ActiveFlow>) -> Self {
        Self { files, scope }
    }

    /// Reacts to the initial scope, then to every change until the sender is
    /// dropped.
    pub async fn run(mut self) {
        loop {
            let scope = self.scope.borrow_and_update().clone();
            let files = Arc::clone(&self.files);
            tokio::spawn(async move { react(&files, &scope).await });

            if self.scope.changed().await.is_err() {
                debug!("scope publisher closed");
                break;
            }
        }
    }
}

pub async fn react(files: &FileCollectionClient, scope: &ActiveFlow) {
    match scope {
        ActiveFlow::NoFlow => files.clear(),
        ActiveFlow::Flow(flow) => {
            debug!(flow_id = %flow, "refreshing flow scope");
            let (_, listing) = futures::join!(files.check_server_status(flow), files.list_files(flow));
            // Listing failures are surfaced through the panel banner.
            listing.ok();
        }
    }
}
