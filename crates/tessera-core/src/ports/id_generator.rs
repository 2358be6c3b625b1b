//! job token と style 保存名の採番
//!
//! 本番もテストも `UlidGenerator` を使い、時刻は Clock から取ります。

use crate::domain::ids::{JobToken, StyleKey};
use crate::ports::Clock;
use ulid::Ulid;

/// Scheduler と FetchAndConvert が共有する採番器。
pub trait IdGenerator: Send + Sync {
    /// Job token（= workflow run id）を生成
    fn generate_job_token(&self) -> JobToken;

    /// Style document の保存名を生成
    fn generate_style_key(&self) -> StyleKey;
}

/// timestamp 部は Clock、残りは乱数。FixedClock を渡すと時刻部が固定される。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let millis = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or_default();
        Ulid::from_parts(millis, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_job_token(&self) -> JobToken {
        JobToken::from(self.next_ulid())
    }

    fn generate_style_key(&self) -> StyleKey {
        StyleKey::from(self.next_ulid())
    }
}
