//! Errors - エラー型と分類
//!
//! 各境界（source / authority / store）のエラーは ports 側で定義し、
//! ここで `SyncError` に集約します。`ErrorKind` は運用上の分類です。

use thiserror::Error;

use super::progress::TransitionError;
use crate::ports::{AuthorityError, SourceError, StoreError};

/// 実行エラーの運用分類
///
/// - Transient: 次の tick で再試行すればよい
/// - Permanent: 再試行しても直らない（運用者の対応が必要）
/// - Infrastructure: 永続化層の障害
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("hospital source: {0}")]
    Source(#[from] SourceError),

    #[error("authority: {0}")]
    Authority(#[from] AuthorityError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Source(_) | SyncError::Authority(_) => ErrorKind::Transient,
            SyncError::Store(StoreError::Unavailable(_)) => ErrorKind::Infrastructure,
            SyncError::Store(_)
            | SyncError::Transition(_)
            | SyncError::NotFound(_)
            | SyncError::InvalidState(_) => ErrorKind::Permanent,
        }
    }
}
