//! ActivityRegistry - Handler の登録と管理

use std::collections::HashMap;
use std::sync::Arc;

use super::Activity;
use super::handler::{DynHandler, Handler, TypedHandler};

/// ActivityRegistry は型付き Handler を登録・管理
///
/// # 内部実装
/// - `register::<A, H>(handler)` で登録
/// - 内部的に TypedHandler でラップして DynHandler に変換
/// - `HashMap<&'static str, Arc<dyn DynHandler>>` で管理
#[derive(Default)]
pub struct ActivityRegistry {
    handlers: HashMap<&'static str, Arc<dyn DynHandler>>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("handler for activity type '{0}' is already registered")]
    AlreadyRegistered(String),
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<A: Activity, H: Handler<A> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        if self.handlers.contains_key(A::TYPE) {
            return Err(RegistryError::AlreadyRegistered(A::TYPE.to_string()));
        }
        self.handlers
            .insert(A::TYPE, Arc::new(TypedHandler::<A, H>::new(handler)));
        Ok(())
    }

    pub fn get(&self, activity_type: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(activity_type).cloned()
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().map(|t| t.to_string()).collect();
        types.sort();
        types
    }
}
