//! Handler trait - Activity を実行する Handler の定義
//!
//! # 二層構造
//! - `Handler<A>`: 型付き。`A` 以外の入力は受け取れない
//! - `DynHandler`: object-safe。engine は JSON payload だけを扱い、
//!   結果もそのまま history に記録できる

use async_trait::async_trait;
use std::marker::PhantomData;

use super::Activity;
use crate::domain::ActivityError;

/// Handler は Activity を実行して出力を返す
///
/// # 使用例
/// ```ignore
/// struct DropTableHandler { store: Arc<dyn LayerStore> }
///
/// #[async_trait]
/// impl Handler<CompensateDropTable> for DropTableHandler {
///     async fn handle(&self, input: CompensateDropTable) -> Result<DropTableOutput, ActivityError> {
///         ...
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<A: Activity>: Send + Sync {
    async fn handle(&self, input: A) -> Result<A::Output, ActivityError>;
}

/// DynHandler は object-safe な Handler の抽象化
///
/// `HashMap<&'static str, Arc<dyn DynHandler>>` に格納するための型消去層。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, payload: serde_json::Value)
    -> Result<serde_json::Value, ActivityError>;

    fn activity_type(&self) -> &'static str;
}

pub struct TypedHandler<A: Activity, H: Handler<A>> {
    handler: H,
    _marker: PhantomData<fn() -> A>,
}

impl<A: Activity, H: Handler<A>> TypedHandler<A, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<A: Activity, H: Handler<A>> DynHandler for TypedHandler<A, H> {
    async fn handle_dyn(
        &self,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, ActivityError> {
        // 入力が decode できない場合は何度やっても同じなので fatal
        let input: A = serde_json::from_value(payload)
            .map_err(|e| ActivityError::fatal(format!("json decode {}: {e}", A::TYPE)))?;
        let output = self.handler.handle(input).await?;
        serde_json::to_value(output)
            .map_err(|e| ActivityError::fatal(format!("json encode {}: {e}", A::TYPE)))
    }

    fn activity_type(&self) -> &'static str {
        A::TYPE
    }
}
