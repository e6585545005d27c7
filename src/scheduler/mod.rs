/// スケジューラ: アップロードキューを駆動する非同期アクター
///
/// キューはアクタータスクが単独で所有し、外部からの操作はすべて
/// `SchedulerHandle` 経由のコマンドとして直列に適用される。
/// 読み手はスナップショット（`watch`）と変更イベント（`broadcast`）だけを見る。
///
/// 受け入れられたアイテムごとに転送タスクを起動し、転送全体には
/// 設定されたタイムアウトを掛ける（期限切れは failed になる）。
mod actor;

use crate::api::transport::UploadTransport;
use crate::config::error::ConfigError;
use crate::config::{APP_CONFIG, UploadSettings};
use crate::domain::item::ItemId;
use crate::domain::progress::QueueEvent;
#[cfg(test)]
use crate::domain::queue::CancelOutcome;
use crate::domain::queue::{QueueSnapshot, UploadQueue};
use crate::domain::validator::AcceptedFile;
use crate::error_severity::ErrorSeverity;
use actor::{Command, Scheduler};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

/// イベントチャネルの容量（遅れた購読者は古いイベントを取りこぼす）
const EVENT_CAPACITY: usize = 1024;

#[derive(Error, Debug)]
pub enum SchedulerError {
    /// アクターが停止している
    #[error("upload scheduler is no longer running")]
    Closed,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SchedulerError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Closed => ErrorSeverity::SystemError,
            Self::Config(e) => e.severity(),
        }
    }

    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Closed => None,
            Self::Config(e) => e.hint(),
        }
    }
}

/// スケジューラの起動オプション
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub max_concurrent_uploads: usize,
    pub transfer_timeout: Duration,
}

impl SchedulerOptions {
    pub fn from_settings(settings: &UploadSettings) -> Self {
        Self {
            max_concurrent_uploads: settings.max_concurrent_uploads(),
            transfer_timeout: Duration::from_secs(APP_CONFIG.api.transfer_timeout_seconds),
        }
    }
}

/// スケジューラへのハンドル（複製可能）
///
/// すべてのハンドルが破棄されるか `shutdown` が呼ばれるとアクターは停止し、
/// 実行中の転送には中断が要求される。
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<QueueSnapshot>,
    events: broadcast::Sender<QueueEvent>,
}

impl SchedulerHandle {
    /// アクターを起動する（tokioランタイム内で呼ぶこと）
    ///
    /// # Errors
    /// 同時アップロード数が0の場合は ConfigError を返します。
    pub fn spawn(
        transport: Arc<dyn UploadTransport>,
        options: SchedulerOptions,
    ) -> Result<Self, ConfigError> {
        let queue = UploadQueue::new(options.max_concurrent_uploads)?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshots) = watch::channel(queue.snapshot());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Scheduler::spawn(
            queue,
            transport,
            options.transfer_timeout,
            command_rx,
            snapshot_tx,
            events.clone(),
        );

        Ok(Self {
            commands,
            snapshots,
            events,
        })
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SchedulerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| SchedulerError::Closed)?;
        response.await.map_err(|_| SchedulerError::Closed)
    }

    /// 検証済みファイルをキューに追加する（空きがあれば即座に転送開始）
    pub async fn enqueue(&self, file: AcceptedFile) -> Result<ItemId, SchedulerError> {
        self.request(|reply| Command::Enqueue { file, reply }).await
    }

    /// アイテムを削除する（実行中の転送は中断しない）
    #[cfg(test)]
    pub async fn remove(&self, id: ItemId) -> Result<bool, SchedulerError> {
        self.request(|reply| Command::Remove { id, reply }).await
    }

    /// キャンセルを要求する
    #[cfg(test)]
    pub async fn cancel(&self, id: ItemId) -> Result<CancelOutcome, SchedulerError> {
        self.request(|reply| Command::Cancel { id, reply }).await
    }

    /// pending をすべてキャンセルし、実行中の転送には中断を要求する
    ///
    /// 戻り値は中断を要求した転送の数。中断の確認後に空いた枠で
    /// 新しい転送が始まることはない。
    pub async fn cancel_all(&self) -> Result<usize, SchedulerError> {
        self.request(|reply| Command::CancelAll { reply }).await
    }

    /// failed のアイテムを再送する
    pub async fn retry(&self, id: ItemId) -> Result<bool, SchedulerError> {
        self.request(|reply| Command::Retry { id, reply }).await
    }

    /// 同時アップロード数の上限を変える
    pub async fn set_max_concurrent_uploads(&self, limit: usize) -> Result<(), SchedulerError> {
        self.request(|reply| Command::SetLimit { limit, reply })
            .await?
            .map_err(SchedulerError::from)
    }

    /// すべてのアイテムを破棄する（実行中の転送は中断される）
    pub async fn reset(&self) -> Result<usize, SchedulerError> {
        self.request(|reply| Command::Reset { reply }).await
    }

    /// 現在のスナップショット
    pub async fn snapshot(&self) -> Result<QueueSnapshot, SchedulerError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// 変更イベントの購読
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// pending / uploading のアイテムがなくなるまで待つ
    pub async fn wait_until_settled(&self) -> Result<QueueSnapshot, SchedulerError> {
        self.wait_for(QueueSnapshot::is_settled).await
    }

    /// スナップショットが条件を満たすまで待ち、満たしたスナップショットを返す
    pub async fn wait_for(
        &self,
        condition: impl Fn(&QueueSnapshot) -> bool,
    ) -> Result<QueueSnapshot, SchedulerError> {
        let mut snapshots = self.snapshots.clone();
        loop {
            {
                let snapshot = snapshots.borrow_and_update();
                if condition(&*snapshot) {
                    return Ok(snapshot.clone());
                }
            }
            snapshots
                .changed()
                .await
                .map_err(|_| SchedulerError::Closed)?;
        }
    }

    /// アクターを停止する
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::InfraError;
    use crate::api::transport::{ProgressSink, TransferFile};
    use crate::domain::item::UploadStatus;
    use crate::domain::metadata::FileIngestor;
    use crate::domain::validator::ValidationPipeline;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;
    use tokio_util::sync::CancellationToken;

    /// 台本どおりに振る舞うインメモリ転送
    ///
    /// 転送は `release` の許可を1つ得るまで完了しない。
    /// `failures` に含まれる名前は1回だけ失敗する。
    struct ScriptedTransport {
        release: Semaphore,
        failures: Mutex<HashSet<String>>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(permits: usize) -> Arc<Self> {
            Arc::new(Self {
                release: Semaphore::new(permits),
                failures: Mutex::new(HashSet::new()),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }

        fn failing(self: Arc<Self>, name: &str) -> Arc<Self> {
            self.failures.lock().unwrap().insert(name.to_string());
            self
        }
    }

    #[async_trait]
    impl UploadTransport for ScriptedTransport {
        async fn upload(
            &self,
            file: TransferFile,
            progress: Arc<dyn ProgressSink>,
            cancel: CancellationToken,
        ) -> Result<serde_json::Value, InfraError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let total = file.metadata.size();
            progress.report(total / 2, total);

            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(InfraError::Aborted),
                permit = self.release.acquire() => {
                    permit.expect("semaphore closed").forget();
                    if self.failures.lock().unwrap().remove(file.metadata.name()) {
                        Err(InfraError::network("scripted failure"))
                    } else {
                        progress.report(total, total);
                        Ok(serde_json::json!({ "file_id": file.metadata.name() }))
                    }
                }
            };

            self.active.fetch_sub(1, Ordering::SeqCst);
            outcome
        }
    }

    fn accepted(name: &str) -> AcceptedFile {
        let mut bytes = b"solid part\n".to_vec();
        bytes.resize(2_000, b' ');
        let candidate = FileIngestor::new().from_bytes(name, bytes, Some("model/stl".to_string()));
        ValidationPipeline::default()
            .accept(candidate)
            .expect("fixture should be valid")
    }

    fn options(limit: usize) -> SchedulerOptions {
        SchedulerOptions {
            max_concurrent_uploads: limit,
            transfer_timeout: Duration::from_secs(5),
        }
    }

    async fn wait_for(
        handle: &SchedulerHandle,
        condition: impl Fn(&QueueSnapshot) -> bool,
    ) -> QueueSnapshot {
        tokio::time::timeout(Duration::from_secs(5), handle.wait_for(condition))
            .await
            .expect("condition not reached in time")
            .expect("scheduler stopped")
    }

    #[tokio::test]
    async fn test_zero_limit_rejected() {
        let result = SchedulerHandle::spawn(ScriptedTransport::new(0), options(0));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_five_items_three_slots() {
        let transport = ScriptedTransport::new(0);
        let handle = SchedulerHandle::spawn(transport.clone(), options(3)).unwrap();
        let mut events = handle.subscribe();

        let names = ["a.stl", "b.stl", "c.stl", "d.stl", "e.stl"];
        let mut ids = Vec::new();
        for name in names {
            ids.push(handle.enqueue(accepted(name)).await.unwrap());
        }

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.count(UploadStatus::Uploading), 3);
        assert_eq!(snapshot.count(UploadStatus::Pending), 2);

        // 1件完了すると次の pending が受け入れられる
        transport.release.add_permits(1);
        let snapshot = wait_for(&handle, |s| s.count(UploadStatus::Completed) == 1).await;
        assert_eq!(snapshot.count(UploadStatus::Uploading), 3);
        assert_eq!(snapshot.count(UploadStatus::Pending), 1);

        transport.release.add_permits(10);
        let snapshot = handle.wait_until_settled().await.unwrap();
        assert_eq!(snapshot.count(UploadStatus::Completed), 5);
        assert_eq!(snapshot.total_progress, 100.0);
        assert!(transport.peak.load(Ordering::SeqCst) <= 3);

        // 受け入れは挿入順
        let mut admitted = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let QueueEvent::StatusChanged {
                id,
                to: UploadStatus::Uploading,
                ..
            } = event
            {
                admitted.push(id);
            }
        }
        assert_eq!(admitted, ids);
    }

    #[tokio::test]
    async fn test_failure_then_retry() {
        let transport = ScriptedTransport::new(100).failing("b.stl");
        let handle = SchedulerHandle::spawn(transport, options(2)).unwrap();

        handle.enqueue(accepted("a.stl")).await.unwrap();
        let b = handle.enqueue(accepted("b.stl")).await.unwrap();

        let snapshot = handle.wait_until_settled().await.unwrap();
        let item = snapshot.item(b).unwrap();
        assert_eq!(item.status, UploadStatus::Failed);
        assert!(item.error.as_deref().unwrap().contains("scripted failure"));
        assert_eq!(snapshot.count(UploadStatus::Completed), 1);
        assert_eq!(snapshot.errors.len(), 1);

        assert!(handle.retry(b).await.unwrap());
        let snapshot = wait_for(&handle, |s| {
            s.item(b).is_some_and(|item| item.status == UploadStatus::Completed)
        })
        .await;
        assert!(snapshot.item(b).unwrap().error.is_none());
        assert!(snapshot.item(b).unwrap().response.is_some());
        // 収集したエラーはリセットまで残る
        assert_eq!(snapshot.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_rejected_for_non_failed() {
        let handle = SchedulerHandle::spawn(ScriptedTransport::new(0), options(1)).unwrap();
        let id = handle.enqueue(accepted("a.stl")).await.unwrap();

        assert!(!handle.retry(id).await.unwrap());
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.item(id).unwrap().status, UploadStatus::Uploading);
    }

    #[tokio::test]
    async fn test_cancel_pending_and_uploading() {
        let handle = SchedulerHandle::spawn(ScriptedTransport::new(0), options(1)).unwrap();
        let a = handle.enqueue(accepted("a.stl")).await.unwrap();
        let b = handle.enqueue(accepted("b.stl")).await.unwrap();

        assert_eq!(handle.cancel(b).await.unwrap(), CancelOutcome::Cancelled);
        assert_eq!(handle.cancel(a).await.unwrap(), CancelOutcome::AbortRequested);

        // 中断の確認までは uploading のまま、確認後に cancelled
        let snapshot = handle.wait_until_settled().await.unwrap();
        assert_eq!(snapshot.item(a).unwrap().status, UploadStatus::Cancelled);
        assert_eq!(snapshot.item(b).unwrap().status, UploadStatus::Cancelled);
        assert!(snapshot.errors.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_all_leaves_nothing_to_admit() {
        let handle = SchedulerHandle::spawn(ScriptedTransport::new(0), options(1)).unwrap();
        let a = handle.enqueue(accepted("a.stl")).await.unwrap();
        let b = handle.enqueue(accepted("b.stl")).await.unwrap();
        let c = handle.enqueue(accepted("c.stl")).await.unwrap();
        let mut events = handle.subscribe();

        assert_eq!(handle.cancel_all().await.unwrap(), 1);

        let snapshot = handle.wait_until_settled().await.unwrap();
        for id in [a, b, c] {
            assert_eq!(snapshot.item(id).unwrap().status, UploadStatus::Cancelled);
        }

        // b と c が uploading になることはない
        while let Ok(event) = events.try_recv() {
            if let QueueEvent::StatusChanged { id, to, .. } = event {
                assert_ne!(to, UploadStatus::Uploading, "{} was admitted", id);
            }
        }
        assert_eq!(handle.cancel_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transfer_timeout_marks_failed() {
        let options = SchedulerOptions {
            max_concurrent_uploads: 1,
            transfer_timeout: Duration::from_millis(50),
        };
        let handle = SchedulerHandle::spawn(ScriptedTransport::new(0), options).unwrap();
        let id = handle.enqueue(accepted("slow.stl")).await.unwrap();

        let snapshot = wait_for(&handle, |s| s.is_settled()).await;
        let item = snapshot.item(id).unwrap();
        assert_eq!(item.status, UploadStatus::Failed);
        assert!(item.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_progress_is_reported() {
        let handle = SchedulerHandle::spawn(ScriptedTransport::new(0), options(1)).unwrap();
        let id = handle.enqueue(accepted("a.stl")).await.unwrap();

        let snapshot = wait_for(&handle, |s| {
            s.item(id).is_some_and(|item| item.progress.loaded() > 0)
        })
        .await;
        assert_eq!(snapshot.item(id).unwrap().progress.loaded(), 1_000);
        assert_eq!(snapshot.total_progress, 50.0);
    }

    #[tokio::test]
    async fn test_limit_changes() {
        let handle = SchedulerHandle::spawn(ScriptedTransport::new(0), options(1)).unwrap();
        for name in ["a.stl", "b.stl", "c.stl"] {
            handle.enqueue(accepted(name)).await.unwrap();
        }

        assert!(matches!(
            handle.set_max_concurrent_uploads(0).await,
            Err(SchedulerError::Config(_))
        ));

        handle.set_max_concurrent_uploads(3).await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.count(UploadStatus::Uploading), 3);
        assert_eq!(snapshot.max_concurrent_uploads, 3);
    }

    #[tokio::test]
    async fn test_remove_and_reset() {
        let handle = SchedulerHandle::spawn(ScriptedTransport::new(0), options(1)).unwrap();
        let a = handle.enqueue(accepted("a.stl")).await.unwrap();
        let b = handle.enqueue(accepted("b.stl")).await.unwrap();

        assert!(handle.remove(a).await.unwrap());
        assert!(!handle.remove(a).await.unwrap());
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.item(b).unwrap().status, UploadStatus::Uploading);

        assert_eq!(handle.reset().await.unwrap(), 1);
        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.items.is_empty());
        assert_eq!(snapshot.total_progress, 0.0);
    }

    #[tokio::test]
    async fn test_closed_after_shutdown() {
        let handle = SchedulerHandle::spawn(ScriptedTransport::new(0), options(1)).unwrap();
        handle.shutdown();

        let result = handle.enqueue(accepted("a.stl")).await;
        assert!(matches!(result, Err(SchedulerError::Closed)));
    }
}
