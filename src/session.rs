//! Per-connection context: auth flag and storage handle

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::commands::CommandError;
use crate::store::Storage;

/// Per-connection state handed to every command: whether the peer has
/// authenticated, and the storage the commands operate on. A session built
/// without storage short-circuits every storage access with an
/// "empty storage" error.
#[derive(Debug)]
pub struct Session {
    authenticated: AtomicBool,
    storage: Option<Arc<Storage>>,
}

impl Session {
    /// Fresh unauthenticated session over the shared storage.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            authenticated: AtomicBool::new(false),
            storage: Some(storage),
        }
    }

    /// Pre-authenticated session, used for journal replay where there is no
    /// client to run AUTH.
    pub fn privileged(storage: Arc<Storage>) -> Self {
        Self {
            authenticated: AtomicBool::new(true),
            storage: Some(storage),
        }
    }

    /// Session with no storage behind it.
    pub fn detached() -> Self {
        Self {
            authenticated: AtomicBool::new(false),
            storage: None,
        }
    }

    pub fn authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    pub fn set_authenticated(&self, auth: bool) {
        self.authenticated.store(auth, Ordering::SeqCst);
    }

    pub fn storage(&self) -> Result<&Storage, CommandError> {
        self.storage
            .as_deref()
            .ok_or(CommandError::EmptyStorage)
    }
}
