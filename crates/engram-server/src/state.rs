//! Shared handler state

use std::collections::HashMap;
use std::sync::Arc;

use engram_core::Engine;

/// State cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    /// api key -> user id
    pub api_keys: Arc<HashMap<String, String>>,
}
