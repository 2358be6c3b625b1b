//! Activity - 型付き Activity API と各 activity
//!
//! activity type の typo を型で排除し、Handler との対応付けを静的に保証します。
//! 各 activity は idempotent か、安全に再試行できるように作られています。
//!
//! | activity | retry class |
//! |---|---|
//! | [`FetchAndConvert`] | retryable（geometry file がなければ fatal） |
//! | [`RegisterLayer`] | retryable（look-up-before-create で idempotent） |
//! | [`CompensateDropTable`] | retryable（`IF EXISTS` で idempotent） |
//! | [`CompensateRemoveStyle`] | retryable（ファイルが無ければ成功） |
//! | [`UpdateJobStatus`] | retryable（同じ status の再書き込みは no-op） |
//! | [`Notify`] | best-effort |

pub mod compensate;
pub mod fetch_and_convert;
pub mod handler;
pub mod job_status;
pub mod notify;
pub mod register_layer;
pub mod registry;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub use self::compensate::{
    CompensateDropTable, CompensateRemoveStyle, DropTableHandler, DropTableOutput,
    RemoveStyleHandler, RemoveStyleOutput,
};
pub use self::fetch_and_convert::{
    ConverterSettings, FetchAndConvert, FetchAndConvertHandler, ImportedLayer,
};
pub use self::handler::{DynHandler, Handler};
pub use self::job_status::{UpdateJobStatus, UpdateJobStatusHandler};
pub use self::notify::{Notify, NotifyHandler};
pub use self::register_layer::{RegisterLayer, RegisterLayerHandler, RegisteredLayer};
pub use self::registry::{ActivityRegistry, RegistryError};

/// Activity は activity type と入出力の型を対応付ける
///
/// # 命名規約
/// - `{domain}.{action}.v{major}`
/// - 例: `import.fetch_and_convert.v1`
///
/// # Trait Bounds
/// - `Serialize` / `DeserializeOwned`: 入力と出力は history に JSON で記録される
/// - `Send + Sync + 'static`: worker pool の task 間で受け渡すため
pub trait Activity: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;

    type Output: Serialize + DeserializeOwned + Send + 'static;
}
