//! Workflow trait - engine が実行する workflow 定義
//!
//! Activity と同じ二層構造です。`Workflow` は型付き、`DynWorkflow` は
//! JSON input を受け取る object-safe な層で、engine はこちらだけを扱います。

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::context::WorkflowContext;
use crate::error::WorkflowError;

/// Workflow は一連の activity を状態機械に沿って実行する
///
/// `run` は crash 後の resume でも先頭から呼び直されます。記録済みの step は
/// [`WorkflowContext::execute`] が記録された結果を返すので、activity は再実行されません。
/// そのため `run` は context 以外の副作用を持ってはいけません。
#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    const TYPE: &'static str;

    /// Activity types the workflow may execute; checked when the engine is built.
    const ACTIVITIES: &'static [&'static str];

    type Input: Serialize + DeserializeOwned + Send + 'static;

    async fn run(&self, ctx: &mut WorkflowContext, input: Self::Input) -> Result<(), WorkflowError>;
}

#[async_trait]
pub trait DynWorkflow: Send + Sync {
    async fn run_dyn(
        &self,
        ctx: &mut WorkflowContext,
        input: serde_json::Value,
    ) -> Result<(), WorkflowError>;

    fn workflow_type(&self) -> &'static str;

    fn activity_types(&self) -> &'static [&'static str];
}

pub struct TypedWorkflow<W: Workflow> {
    workflow: W,
}

impl<W: Workflow> TypedWorkflow<W> {
    pub fn new(workflow: W) -> Self {
        Self { workflow }
    }
}

#[async_trait]
impl<W: Workflow> DynWorkflow for TypedWorkflow<W> {
    async fn run_dyn(
        &self,
        ctx: &mut WorkflowContext,
        input: serde_json::Value,
    ) -> Result<(), WorkflowError> {
        let input: W::Input = serde_json::from_value(input)
            .map_err(|e| WorkflowError::Input(format!("json decode {}: {e}", W::TYPE)))?;
        self.workflow.run(ctx, input).await
    }

    fn workflow_type(&self) -> &'static str {
        W::TYPE
    }

    fn activity_types(&self) -> &'static [&'static str] {
        W::ACTIVITIES
    }
}
