//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryStore**: 全 store port のインメモリ実装（CLI・テスト用）
//! - **InMemorySource**: 病院側テーブルのインメモリ版（JSON フィクスチャ対応）
//! - **HttpAuthority**: 保険者 API の reqwest クライアント
//! - **StubAuthority**: スクリプト応答を返すスタブ（テスト・dry-run 用）

pub mod http_authority;
pub mod memory_source;
pub mod memory_store;
pub mod stub_authority;

pub use self::http_authority::{HttpAuthority, RequestSigner, StaticHeaders};
pub use self::memory_source::{InMemorySource, MilestoneFixtureRow, SourceFixture};
pub use self::memory_store::InMemoryStore;
pub use self::stub_authority::{RecordedCall, StubAuthority};
