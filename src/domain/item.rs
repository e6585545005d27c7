/// ドメイン層: アップロードアイテムと状態遷移
///
/// 1ファイルのライフサイクル（pending/uploading/completed/failed/cancelled）を表す。
/// 状態遷移表にない遷移は拒否され、呼び出し側では何も起きない。
use crate::domain::metadata::{FileMetadata, FileSource};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// アイテムID
pub type ItemId = Uuid;

/// アップロード状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

impl UploadStatus {
    /// 遷移表
    ///
    /// ```text
    /// pending   -> uploading   (受け入れ)
    /// uploading -> completed   (転送成功)
    /// uploading -> failed      (転送失敗)
    /// pending   -> cancelled   (キャンセル)
    /// uploading -> cancelled   (中断の確認後)
    /// failed    -> pending     (リトライ)
    /// ```
    pub fn can_transition_to(self, next: UploadStatus) -> bool {
        use UploadStatus::*;
        matches!(
            (self, next),
            (Pending, Uploading)
                | (Uploading, Completed)
                | (Uploading, Failed)
                | (Pending, Cancelled)
                | (Uploading, Cancelled)
                | (Failed, Pending)
        )
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", label)
    }
}

/// アイテム単位の進捗
///
/// 不変条件: `loaded <= total`。`percentage` は `total > 0` のとき
/// `loaded / total * 100`、それ以外は 0。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ItemProgress {
    loaded: u64,
    total: u64,
    percentage: f64,
}

impl ItemProgress {
    pub fn new(total: u64) -> Self {
        Self {
            loaded: 0,
            total,
            percentage: 0.0,
        }
    }

    pub fn loaded(&self) -> u64 {
        self.loaded
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn percentage(&self) -> f64 {
        self.percentage
    }

    /// 進捗を更新する（`loaded` は `total` で頭打ち）
    pub fn update(&mut self, loaded: u64, total: u64) {
        self.total = total;
        self.loaded = loaded.min(total);
        self.percentage = if total > 0 {
            self.loaded as f64 / total as f64 * 100.0
        } else {
            0.0
        };
    }

    fn complete(&mut self) {
        self.update(self.total, self.total);
    }

    fn reset(&mut self) {
        self.update(0, self.total);
    }
}

/// アップロードアイテム
///
/// バイトソースはアイテムが排他的に所有し、完了・キャンセル時に解放する。
/// フィールドの変更は `UploadQueue` の操作経由でのみ行う。
#[derive(Debug)]
pub struct UploadItem {
    id: ItemId,
    source: Option<FileSource>,
    metadata: FileMetadata,
    progress: ItemProgress,
    status: UploadStatus,
    error: Option<String>,
    response: Option<serde_json::Value>,
    abort_requested: bool,
}

impl UploadItem {
    pub(crate) fn new(source: FileSource, metadata: FileMetadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            progress: ItemProgress::new(metadata.size()),
            source: Some(source),
            metadata,
            status: UploadStatus::Pending,
            error: None,
            response: None,
            abort_requested: false,
        }
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn progress(&self) -> &ItemProgress {
        &self.progress
    }

    pub fn status(&self) -> UploadStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn source(&self) -> Option<&FileSource> {
        self.source.as_ref()
    }

    pub fn abort_requested(&self) -> bool {
        self.abort_requested
    }

    pub(crate) fn request_abort(&mut self) {
        self.abort_requested = true;
    }

    pub(crate) fn update_progress(&mut self, loaded: u64, total: u64) {
        self.progress.update(loaded, total);
    }

    pub(crate) fn set_response(&mut self, response: serde_json::Value) {
        self.response = Some(response);
    }

    /// 遷移表に従って状態を変える
    ///
    /// 不正な遷移なら `false` を返し、何も変更しない。
    pub(crate) fn transition(&mut self, next: UploadStatus, error: Option<String>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }

        match next {
            UploadStatus::Uploading => {
                self.abort_requested = false;
            }
            UploadStatus::Completed => {
                self.progress.complete();
                self.source = None;
            }
            UploadStatus::Failed => {
                self.error = error;
            }
            UploadStatus::Cancelled => {
                self.source = None;
            }
            UploadStatus::Pending => {
                // リトライは0バイト目からやり直す
                self.error = None;
                self.response = None;
                self.progress.reset();
            }
        }

        self.status = next;
        true
    }

    /// 読み取り専用のスナップショット
    pub fn snapshot(&self) -> ItemSnapshot {
        ItemSnapshot {
            id: self.id,
            metadata: self.metadata.clone(),
            progress: self.progress,
            status: self.status,
            error: self.error.clone(),
            response: self.response.clone(),
        }
    }
}

/// アイテムのスナップショット（バイトソースは含まない）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemSnapshot {
    pub id: ItemId,
    pub metadata: FileMetadata,
    pub progress: ItemProgress,
    pub status: UploadStatus,
    pub error: Option<String>,
    pub response: Option<serde_json::Value>,
}
