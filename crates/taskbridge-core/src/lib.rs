//! taskbridge-core
//!
//! 病院情報システムの受付・診療イベントを保険者のオンライン受付 API に同期する。
//!
//! # モジュール構成
//! - **config**: 環境変数からの設定（`TASKBRIDGE_*`）
//! - **domain**: ドメインモデル（milestone, progress, watermark, schedule, job, issue, errors）
//! - **ports**: 抽象化レイヤー（HospitalSource, AuthorityApi, 各 store, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（poller, admission, queue builder, dispatch, admin, status）
//! - **impls**: 実装（インメモリ store / source、HTTP クライアント、スタブ）

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
