//! Web server shared state.

use std::path::PathBuf;
use std::sync::Arc;

use crate::session::StreamController;
use crate::store::StoreHandle;

/// Shared by every handler.
pub struct WebState {
    pub controller: Arc<StreamController>,
    pub store: StoreHandle,
    /// Directory served as the web front end.
    pub frontend_dir: PathBuf,
}

impl WebState {
    pub fn new(controller: Arc<StreamController>, store: StoreHandle, frontend_dir: PathBuf) -> Self {
        Self {
            controller,
            store,
            frontend_dir,
        }
    }
}
