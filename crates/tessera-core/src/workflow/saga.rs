//! Saga - step ごとに登録する compensation のリスト
//!
//! 副作用を取り消せる step だけが成功時に [`Compensation`] を push します。
//! 致命的な失敗では登録と逆順に実行します。

use crate::activity::{CompensateDropTable, CompensateRemoveStyle};
use crate::domain::StyleFileRef;
use crate::engine::{ActivityOptions, WorkflowContext};
use crate::error::WorkflowError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    /// Drop the table the converter loaded.
    DropTable { layer_name: String },
    /// Delete the style document copied into style storage.
    RemoveStyleFile { style_file: StyleFileRef },
}

#[derive(Debug, Default)]
pub struct Saga {
    compensations: Vec<Compensation>,
}

impl Saga {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, compensation: Compensation) {
        self.compensations.push(compensation);
    }

    /// Run every registered compensation, most recent first.
    ///
    /// A compensation that fails for good is logged and the rest still run;
    /// only engine errors are returned.
    pub async fn compensate(
        self,
        ctx: &mut WorkflowContext,
        options: &ActivityOptions,
    ) -> Result<(), WorkflowError> {
        for compensation in self.compensations.into_iter().rev() {
            let result = match &compensation {
                Compensation::DropTable { layer_name } => ctx
                    .execute(
                        CompensateDropTable {
                            layer_name: layer_name.clone(),
                        },
                        options,
                    )
                    .await
                    .map(|out| out.dropped),
                Compensation::RemoveStyleFile { style_file } => ctx
                    .execute(
                        CompensateRemoveStyle {
                            style_file: style_file.clone(),
                        },
                        options,
                    )
                    .await
                    .map(|out| out.removed),
            };
            match result {
                Ok(undone) => {
                    tracing::info!(run_id = %ctx.run_id(), ?compensation, undone, "compensated");
                }
                Err(WorkflowError::Step(failure)) => {
                    tracing::error!(
                        run_id = %ctx.run_id(),
                        ?compensation,
                        error = %failure,
                        "compensation failed, side effect may be left behind"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
