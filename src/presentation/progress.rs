/// プレゼンテーション層: キューイベントの進捗表示
///
/// ドメイン層の`QueueEvent`をUI表示に適した形式に変換します。
///
/// # 設計方針
/// - `From<&QueueEvent>`で借用による変換（所有権を奪わない）
/// - `Option<DisplayProgress>`で表示抑制を明示的に表現
/// - バイト単位の進捗は`ProgressThrottle`で10%刻みに間引く
use crate::domain::item::{ItemId, UploadStatus};
use crate::domain::progress::QueueEvent;
use crate::domain::validator::format_mb;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// 進捗表示のカテゴリ
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressCategory {
    /// キューへの追加・削除・設定変更
    Queue,
    /// 転送中
    Upload,
    /// 完了
    Completed,
    /// 失敗
    Failed,
    /// キャンセル
    Cancelled,
}

/// プレゼンテーション層用の進捗情報
#[derive(Debug, Clone)]
pub struct DisplayProgress {
    /// 表示用メッセージ
    pub message: String,
    /// 進捗カテゴリ
    pub category: ProgressCategory,
    /// 詳細情報（オプション）
    pub details: Option<String>,
}

impl DisplayProgress {
    pub fn new(message: String, category: ProgressCategory) -> Self {
        Self {
            message,
            category,
            details: None,
        }
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }
}

/// `QueueEvent`から`DisplayProgress`への変換
///
/// # 戻り値
/// - `Some(DisplayProgress)`: 表示すべき進捗情報
/// - `None`: 表示しない（pending への戻りなど、単独では意味の薄い遷移）
impl From<&QueueEvent> for Option<DisplayProgress> {
    fn from(event: &QueueEvent) -> Self {
        match event {
            QueueEvent::ItemAdded {
                file_name,
                size_bytes,
                ..
            } => Some(DisplayProgress::new(
                format!("Queued: {} ({} MB)", file_name, format_mb(*size_bytes)),
                ProgressCategory::Queue,
            )),
            QueueEvent::StatusChanged {
                file_name,
                to,
                error,
                ..
            } => format_status_change(file_name, *to, error.as_deref()),
            QueueEvent::Progress {
                file_name,
                percentage,
                overall,
                ..
            } => Some(
                DisplayProgress::new(
                    format!("Uploading {}: {:.0}%", file_name, percentage),
                    ProgressCategory::Upload,
                )
                .with_details(format!("overall {:.1}%", overall)),
            ),
            QueueEvent::AbortRequested { file_name, .. } => Some(DisplayProgress::new(
                format!("Cancelling: {}", file_name),
                ProgressCategory::Cancelled,
            )),
            #[cfg(test)]
            QueueEvent::ItemRemoved { file_name, .. } => Some(DisplayProgress::new(
                format!("Removed: {}", file_name),
                ProgressCategory::Queue,
            )),
            QueueEvent::LimitChanged {
                max_concurrent_uploads,
            } => Some(DisplayProgress::new(
                format!("Concurrent uploads: {}", max_concurrent_uploads),
                ProgressCategory::Queue,
            )),
            QueueEvent::Reset { removed } => Some(DisplayProgress::new(
                format!("Queue cleared ({} item(s))", removed),
                ProgressCategory::Queue,
            )),
        }
    }
}

fn format_status_change(
    file_name: &str,
    to: UploadStatus,
    error: Option<&str>,
) -> Option<DisplayProgress> {
    match to {
        UploadStatus::Uploading => Some(DisplayProgress::new(
            format!("Uploading {}...", file_name),
            ProgressCategory::Upload,
        )),
        UploadStatus::Completed => Some(DisplayProgress::new(
            format!("Uploaded: {}", file_name),
            ProgressCategory::Completed,
        )),
        UploadStatus::Failed => {
            let progress = DisplayProgress::new(
                format!("Failed: {}", file_name),
                ProgressCategory::Failed,
            );
            Some(match error {
                Some(error) => progress.with_details(error.to_string()),
                None => progress,
            })
        }
        UploadStatus::Cancelled => Some(DisplayProgress::new(
            format!("Cancelled: {}", file_name),
            ProgressCategory::Cancelled,
        )),
        UploadStatus::Pending => None,
    }
}

/// バイト単位の進捗イベントを間引く
///
/// アイテムごとに最後に表示した10%刻みの段階を覚えておき、
/// 段階が進んだときだけ通す。進捗以外のイベントは常に通す。
#[derive(Debug, Default)]
pub struct ProgressThrottle {
    last_step: HashMap<ItemId, u8>,
}

impl ProgressThrottle {
    const STEP: f64 = 10.0;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_display(&mut self, event: &QueueEvent) -> bool {
        match event {
            QueueEvent::Progress { id, percentage, .. } => {
                let step = (percentage / Self::STEP).floor().clamp(0.0, 10.0) as u8;
                match self.last_step.get(id) {
                    Some(last) if *last >= step => false,
                    _ => {
                        self.last_step.insert(*id, step);
                        true
                    }
                }
            }
            QueueEvent::StatusChanged {
                id,
                to: UploadStatus::Pending,
                ..
            } => {
                // リトライで0%からやり直す
                self.last_step.remove(id);
                true
            }
            #[cfg(test)]
            QueueEvent::ItemRemoved { id, .. } => {
                self.last_step.remove(id);
                true
            }
            QueueEvent::Reset { .. } => {
                self.last_step.clear();
                true
            }
            _ => true,
        }
    }
}

/// イベントを購読して進捗を出力するタスクを起動する
///
/// # Output
/// * `machine_output = false`: 人間向けの進捗行（stderr）
/// * `machine_output = true`: イベントごとの1行JSON（stdout）
///
/// 送信側がすべて破棄されるとタスクは終了する。
pub fn spawn_reporter(
    mut events: broadcast::Receiver<QueueEvent>,
    machine_output: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut throttle = ProgressThrottle::new();
        loop {
            match events.recv().await {
                Ok(event) => {
                    if !throttle.should_display(&event) {
                        continue;
                    }
                    if machine_output {
                        match serde_json::to_string(&event) {
                            Ok(line) => println!("{}", line),
                            Err(e) => tracing::warn!(error = %e, "failed to serialize progress event"),
                        }
                    } else if let Some(display) = Option::<DisplayProgress>::from(&event) {
                        print_display(&display);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "progress reporter lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn print_display(display: &DisplayProgress) {
    match &display.details {
        Some(details) => eprintln!("{} ({})", display.message, details),
        None => eprintln!("{}", display.message),
    }
}
