//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。外部システムとの境界をすべて trait にします。
//!
//! # 境界
//! - 病院情報システム（読み取り専用の取り込み元）
//! - 保険者 API（送信先）
//! - 永続化（Visit / Watermark / Schedule / Job / Issue / 送信ログ）
//! - 時刻と ID 採番（テストで差し替える）

pub mod authority;
pub mod clock;
pub mod id_generator;
pub mod source;
pub mod store;

pub use self::authority::{
    AuthorityApi, AuthorityError, AuthorityResponse, AuthoritySchedule, MILESTONE_UPDATE_ENDPOINT,
    REGISTRATION_ENDPOINT,
};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::source::{HospitalSource, MilestoneRow, RegisterRow, SourceError, WeekdaySchedule};
pub use self::store::{
    DispatchLogStore, IssueStore, JobStore, QueueStats, ScheduleStore, StoreError, Stores,
    VisitStore, WatermarkStore,
};
