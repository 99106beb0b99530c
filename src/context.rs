use std::sync::Arc;

use crate::dispatch::MessageDispatcher;
use crate::roster::PermissionStore;

/// Shared handles passed explicitly to every component.
#[derive(Clone)]
pub struct BotContext {
    pub store: Arc<PermissionStore>,
    pub dispatcher: Arc<dyn MessageDispatcher>,
}

impl BotContext {
    pub fn new(store: Arc<PermissionStore>, dispatcher: Arc<dyn MessageDispatcher>) -> Self {
        Self { store, dispatcher }
    }
}
