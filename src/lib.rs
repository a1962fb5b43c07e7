//! hexabase - encrypted container store with a database/cluster/bucket
//! hierarchy, role-based authorization and user identity.
//!
//! Every logical container is one AES-256-GCM envelope on disk. The
//! hierarchy keeps parent reference lists and statistics consistent across
//! containers with ordered writes and repair tooling.

pub mod auth;
pub mod cipher;
pub mod cli;
pub mod config;
pub mod container;
pub mod errors;
pub mod hierarchy;
pub mod observability;

use std::sync::Arc;

use tracing::{info, warn};

pub use auth::{Actor, AuthService, AuthorizationGuard, Role};
pub use cipher::KeyManager;
pub use config::HexabaseConfig;
pub use container::{ContainerStore, Storage};
pub use errors::{HexaError, HexaResult};
pub use hierarchy::HierarchyService;

/// Process-wide wiring: one key, one storage root, the two services
#[derive(Debug, Clone)]
pub struct Hexabase {
    storage: Storage,
    hierarchy: HierarchyService,
    auth: AuthService,
}

impl Hexabase {
    /// Load or create the key, open the data directory and build services
    pub fn open(config: &HexabaseConfig) -> HexaResult<Self> {
        let keys = Arc::new(KeyManager::load_or_generate(&config.storage.key_path)?);
        if config.security.uses_default_secret() {
            warn!("using the built-in JWT secret; set HEXABASE_JWT_SECRET");
        }
        let hexabase = Self::with_keys(config, keys)?;
        info!(data_dir = %config.storage.data_dir.display(), "hexabase opened");
        Ok(hexabase)
    }

    /// Build services around an existing key
    pub fn with_keys(config: &HexabaseConfig, keys: Arc<KeyManager>) -> HexaResult<Self> {
        let storage = Storage::open(&config.storage.data_dir, keys)?;
        let guard = AuthorizationGuard::new();
        Ok(Self {
            hierarchy: HierarchyService::new(storage.clone(), guard),
            auth: AuthService::new(&storage, config.to_auth_config())?,
            storage,
        })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn hierarchy(&self) -> &HierarchyService {
        &self.hierarchy
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }
}
