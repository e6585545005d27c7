/// ドメイン層: アップロードキュー
///
/// すべてのアイテムを挿入順に保持し、同時アップロード数の上限の下で
/// pending のアイテムをFIFOで受け入れる（admission）。
///
/// キュー自体は同期的なデータ構造で、書き込みは所有者（スケジューラ）だけが行う。
/// 各操作の結果は変更イベントと新たに受け入れたIDとして蓄積され、
/// 所有者が `take_changes` で取り出して転送の開始と通知に使う。
use crate::config::error::ConfigError;
use crate::domain::item::{ItemId, ItemSnapshot, UploadItem, UploadStatus};
use crate::domain::progress::{ProgressAggregator, QueueEvent};
use crate::domain::validator::AcceptedFile;
use serde::Serialize;

/// キャンセル要求の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// pending だったので即座にキャンセルした
    Cancelled,
    /// uploading なのでトランスポートへの中断要求が必要（状態はまだ uploading）
    AbortRequested,
    /// 対象外（不明なID、中断要求済み、または終了済み）
    Ignored,
}

/// 操作によって生じた変更
#[derive(Debug, Default)]
pub struct QueueChanges {
    pub events: Vec<QueueEvent>,
    /// 新たに uploading になったアイテム（転送を開始すべきもの）
    pub admitted: Vec<ItemId>,
}

impl QueueChanges {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.admitted.is_empty()
    }
}

/// キュー全体の読み取り専用スナップショット
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSnapshot {
    pub items: Vec<ItemSnapshot>,
    pub max_concurrent_uploads: usize,
    pub total_progress: f64,
    pub is_uploading: bool,
    pub errors: Vec<String>,
    pub current: Option<ItemId>,
}

impl QueueSnapshot {
    /// pending / uploading のアイテムが残っていないか
    pub fn is_settled(&self) -> bool {
        self.items
            .iter()
            .all(|item| !matches!(item.status, UploadStatus::Pending | UploadStatus::Uploading))
    }
}

/// アップロードキュー
#[derive(Debug)]
pub struct UploadQueue {
    items: Vec<UploadItem>,
    max_concurrent_uploads: usize,
    total_progress: f64,
    is_uploading: bool,
    errors: Vec<String>,
    current: Option<ItemId>,
    changes: QueueChanges,
}

impl UploadQueue {
    /// # Errors
    /// `max_concurrent_uploads` が0の場合に ConfigError::ValidationError を返します。
    pub fn new(max_concurrent_uploads: usize) -> Result<Self, ConfigError> {
        Self::check_limit(max_concurrent_uploads)?;
        Ok(Self {
            items: Vec::new(),
            max_concurrent_uploads,
            total_progress: 0.0,
            is_uploading: false,
            errors: Vec::new(),
            current: None,
            changes: QueueChanges::default(),
        })
    }

    fn check_limit(limit: usize) -> Result<(), ConfigError> {
        if limit == 0 {
            return Err(ConfigError::validation_error(
                "max_concurrent_uploads must be at least 1",
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // 参照
    // ------------------------------------------------------------------

    pub fn get(&self, id: ItemId) -> Option<&UploadItem> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub fn count(&self, status: UploadStatus) -> usize {
        self.items.iter().filter(|item| item.status() == status).count()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            items: self.items.iter().map(UploadItem::snapshot).collect(),
            max_concurrent_uploads: self.max_concurrent_uploads,
            total_progress: self.total_progress,
            is_uploading: self.is_uploading,
            errors: self.errors.clone(),
            current: self.current,
        }
    }

    /// 蓄積された変更を取り出す
    pub fn take_changes(&mut self) -> QueueChanges {
        std::mem::take(&mut self.changes)
    }

    // ------------------------------------------------------------------
    // 操作
    // ------------------------------------------------------------------

    /// 検証済みファイルを末尾に追加する（pending、進捗は {0, size, 0}）
    pub fn add_item(&mut self, file: AcceptedFile) -> ItemId {
        let (source, metadata) = file.into_parts();
        let item = UploadItem::new(source, metadata);
        let id = item.id();

        self.changes.events.push(QueueEvent::ItemAdded {
            id,
            file_name: item.metadata().name().to_string(),
            size_bytes: item.metadata().size(),
        });
        self.items.push(item);

        self.recompute_aggregates();
        self.admit();
        id
    }

    /// アイテムを無条件に削除する
    ///
    /// 転送の中断は行わない。uploading のアイテムを削除する場合、
    /// 呼び出し側が先にトランスポートを中断しておくこと。
    #[cfg(test)]
    pub fn remove_item(&mut self, id: ItemId) -> bool {
        let Some(index) = self.items.iter().position(|item| item.id() == id) else {
            return false;
        };

        let item = self.items.remove(index);
        if self.current == Some(id) {
            self.current = None;
        }

        self.changes.events.push(QueueEvent::ItemRemoved {
            id,
            file_name: item.metadata().name().to_string(),
        });

        self.recompute_aggregates();
        if item.status() == UploadStatus::Uploading {
            self.admit();
        }
        true
    }

    /// 転送中アイテムの進捗を更新し、全体進捗を再計算する
    ///
    /// uploading 以外のアイテムへの更新（完了後に届いた遅延イベントなど）は無視する。
    pub fn update_progress(&mut self, id: ItemId, loaded: u64, total: u64) -> bool {
        let Some(item) = self.items.iter_mut().find(|item| item.id() == id) else {
            return false;
        };
        if item.status() != UploadStatus::Uploading {
            return false;
        }

        item.update_progress(loaded, total);
        let progress = *item.progress();
        let file_name = item.metadata().name().to_string();

        self.recompute_aggregates();
        self.changes.events.push(QueueEvent::Progress {
            id,
            file_name,
            loaded: progress.loaded(),
            total: progress.total(),
            percentage: progress.percentage(),
            overall: self.total_progress,
        });
        true
    }

    /// 遷移表に従って状態を変える
    ///
    /// 不正な遷移・不明なIDは何もせず `false` を返す。
    /// uploading への遷移は受け入れ（FIFO・上限つき）だけが行うので、ここでは常に拒否する。
    /// uploading から抜けた場合は即座に受け入れを再走査する。
    pub fn set_status(&mut self, id: ItemId, status: UploadStatus, error: Option<String>) -> bool {
        if status == UploadStatus::Uploading {
            return false;
        }

        let Some(item) = self.items.iter_mut().find(|item| item.id() == id) else {
            return false;
        };

        let from = item.status();
        if !item.transition(status, error) {
            return false;
        }

        let file_name = item.metadata().name().to_string();
        let error = item.error().map(str::to_string);

        if status == UploadStatus::Failed {
            self.errors.push(format!(
                "{}: {}",
                file_name,
                error.as_deref().unwrap_or("upload failed")
            ));
        }

        self.changes.events.push(QueueEvent::StatusChanged {
            id,
            file_name,
            from,
            to: status,
            error,
        });

        self.recompute_aggregates();
        if from == UploadStatus::Uploading || status == UploadStatus::Pending {
            self.admit();
        }
        true
    }

    /// 転送成功: サーバーの応答を記録して completed にする
    pub fn complete(&mut self, id: ItemId, response: serde_json::Value) -> bool {
        let Some(item) = self.items.iter_mut().find(|item| item.id() == id) else {
            return false;
        };
        if item.status() != UploadStatus::Uploading {
            return false;
        }
        item.set_response(response);
        self.set_status(id, UploadStatus::Completed, None)
    }

    /// failed のアイテムを pending に戻す（エラーを消去し、0バイト目から再送）
    ///
    /// failed 以外では何もせず `false` を返す。
    pub fn retry(&mut self, id: ItemId) -> bool {
        match self.get(id) {
            Some(item) if item.status() == UploadStatus::Failed => {
                self.set_status(id, UploadStatus::Pending, None)
            }
            _ => false,
        }
    }

    /// キャンセルを要求する
    ///
    /// pending は即座に cancelled になる。uploading は中断要求を記録するだけで、
    /// トランスポートが中断を確認した時点で `set_status(Cancelled)` すること。
    pub fn request_cancel(&mut self, id: ItemId) -> CancelOutcome {
        let Some(item) = self.items.iter_mut().find(|item| item.id() == id) else {
            return CancelOutcome::Ignored;
        };

        match item.status() {
            UploadStatus::Pending => {
                self.set_status(id, UploadStatus::Cancelled, None);
                CancelOutcome::Cancelled
            }
            UploadStatus::Uploading if !item.abort_requested() => {
                item.request_abort();
                let file_name = item.metadata().name().to_string();
                self.changes
                    .events
                    .push(QueueEvent::AbortRequested { id, file_name });
                CancelOutcome::AbortRequested
            }
            _ => CancelOutcome::Ignored,
        }
    }

    /// pending と uploading のアイテムをすべてキャンセルする
    ///
    /// pending をすべて cancelled にしてから uploading に中断を要求するため、
    /// 中断の確認で枠が空いても新たに受け入れられるアイテムは残っていない。
    /// 戻り値は中断を要求したアイテム（トランスポートへの中断が必要）。
    pub fn cancel_all(&mut self) -> Vec<ItemId> {
        let pending: Vec<ItemId> = self
            .items
            .iter()
            .filter(|item| item.status() == UploadStatus::Pending)
            .map(UploadItem::id)
            .collect();
        for id in pending {
            self.set_status(id, UploadStatus::Cancelled, None);
        }

        let uploading: Vec<ItemId> = self
            .items
            .iter()
            .filter(|item| item.status() == UploadStatus::Uploading)
            .map(UploadItem::id)
            .collect();
        uploading
            .into_iter()
            .filter(|id| self.request_cancel(*id) == CancelOutcome::AbortRequested)
            .collect()
    }

    /// 同時アップロード数の上限を変える
    ///
    /// 下げても実行中の転送は止めない。上げた場合は即座に受け入れる。
    pub fn set_max_concurrent_uploads(&mut self, limit: usize) -> Result<(), ConfigError> {
        Self::check_limit(limit)?;
        self.max_concurrent_uploads = limit;
        self.changes.events.push(QueueEvent::LimitChanged {
            max_concurrent_uploads: limit,
        });
        self.admit();
        Ok(())
    }

    /// すべてのアイテムと集計値を破棄する
    pub fn reset(&mut self) -> usize {
        let removed = self.items.len();
        self.items.clear();
        self.errors.clear();
        self.current = None;
        self.changes.admitted.clear();
        self.changes.events.push(QueueEvent::Reset { removed });
        self.recompute_aggregates();
        removed
    }

    // ------------------------------------------------------------------
    // 内部処理
    // ------------------------------------------------------------------

    /// pending を挿入順に走査し、上限に達するまで uploading にする
    fn admit(&mut self) {
        let mut slots = self
            .max_concurrent_uploads
            .saturating_sub(self.count(UploadStatus::Uploading));

        for item in self.items.iter_mut() {
            if slots == 0 {
                break;
            }
            if item.status() != UploadStatus::Pending {
                continue;
            }
            if item.transition(UploadStatus::Uploading, None) {
                let id = item.id();
                self.changes.admitted.push(id);
                self.changes.events.push(QueueEvent::StatusChanged {
                    id,
                    file_name: item.metadata().name().to_string(),
                    from: UploadStatus::Pending,
                    to: UploadStatus::Uploading,
                    error: None,
                });
                self.current = Some(id);
                slots -= 1;
            }
        }

        self.recompute_aggregates();
    }

    fn recompute_aggregates(&mut self) {
        self.total_progress = ProgressAggregator::aggregate(self.items.iter().map(UploadItem::progress));
        self.is_uploading = self
            .items
            .iter()
            .any(|item| item.status() == UploadStatus::Uploading);
    }
}
