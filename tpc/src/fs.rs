use std::sync::Arc;

use crate::config::TpcConfig;
use crate::file::TpcFile;
use crate::session::SessionRegistry;
use crate::storage::Storage;

/// State shared by all handles of one server.
pub(crate) struct Shared {
    pub registry: SessionRegistry,
    pub storage: Arc<dyn Storage>,
    pub connector: Arc<dyn remote::RemoteConnector>,
    pub config: TpcConfig,
}

/// Entry point of the third-party-copy layer, owns the session registry.
///
/// Cloning is cheap and every clone shares the same registry.
#[derive(Clone)]
pub struct TpcFs {
    shared: Arc<Shared>,
}

impl TpcFs {
    pub fn new(
        storage: Arc<dyn Storage>,
        connector: Arc<dyn remote::RemoteConnector>,
        config: TpcConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: SessionRegistry::new(),
                storage,
                connector,
                config,
            }),
        }
    }

    /// A fresh, unopened file handle.
    pub fn new_file(&self) -> TpcFile {
        TpcFile::new(self.shared.clone())
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.shared.registry
    }

    pub fn config(&self) -> &TpcConfig {
        &self.shared.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.shared.storage
    }
}

impl std::fmt::Debug for TpcFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TpcFs")
            .field("registry", &self.shared.registry)
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}
