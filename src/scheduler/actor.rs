/// スケジューラのアクター本体
///
/// `UploadQueue` の唯一の書き込み手。ハンドルからのコマンドと転送タスクからの
/// 報告を1つのループで順に適用し、変更のたびにスナップショットとイベントを配信する。
use crate::api::error::InfraError;
use crate::api::transport::{ProgressSink, TransferFile, UploadTransport};
use crate::config::error::ConfigError;
use crate::domain::item::{ItemId, UploadStatus};
use crate::domain::progress::QueueEvent;
#[cfg(test)]
use crate::domain::queue::CancelOutcome;
use crate::domain::queue::{QueueSnapshot, UploadQueue};
use crate::domain::validator::AcceptedFile;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

/// ハンドルからアクターへのコマンド
pub(super) enum Command {
    Enqueue {
        file: AcceptedFile,
        reply: oneshot::Sender<ItemId>,
    },
    #[cfg(test)]
    Remove {
        id: ItemId,
        reply: oneshot::Sender<bool>,
    },
    #[cfg(test)]
    Cancel {
        id: ItemId,
        reply: oneshot::Sender<CancelOutcome>,
    },
    CancelAll {
        reply: oneshot::Sender<usize>,
    },
    Retry {
        id: ItemId,
        reply: oneshot::Sender<bool>,
    },
    SetLimit {
        limit: usize,
        reply: oneshot::Sender<Result<(), ConfigError>>,
    },
    Reset {
        reply: oneshot::Sender<usize>,
    },
    Snapshot {
        reply: oneshot::Sender<QueueSnapshot>,
    },
    Shutdown,
}

/// 転送タスクからの報告
enum Report {
    Progress { id: ItemId, loaded: u64, total: u64 },
    Finished {
        id: ItemId,
        outcome: Result<serde_json::Value, InfraError>,
    },
}

/// 転送タスクの進捗をアクターへ転送するシンク
struct ReportSink {
    id: ItemId,
    reports: mpsc::UnboundedSender<Report>,
}

impl ProgressSink for ReportSink {
    fn report(&self, loaded: u64, total: u64) {
        let _ = self.reports.send(Report::Progress {
            id: self.id,
            loaded,
            total,
        });
    }
}

pub(super) struct Scheduler {
    queue: UploadQueue,
    transport: Arc<dyn UploadTransport>,
    transfer_timeout: Duration,
    tokens: HashMap<ItemId, CancellationToken>,
    reports: mpsc::UnboundedSender<Report>,
    snapshots: watch::Sender<QueueSnapshot>,
    events: broadcast::Sender<QueueEvent>,
}

impl Scheduler {
    /// アクターを起動する
    pub(super) fn spawn(
        queue: UploadQueue,
        transport: Arc<dyn UploadTransport>,
        transfer_timeout: Duration,
        commands: mpsc::UnboundedReceiver<Command>,
        snapshots: watch::Sender<QueueSnapshot>,
        events: broadcast::Sender<QueueEvent>,
    ) {
        let (reports, report_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            queue,
            transport,
            transfer_timeout,
            tokens: HashMap::new(),
            reports,
            snapshots,
            events,
        };
        tokio::spawn(scheduler.run(commands, report_rx));
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut reports: mpsc::UnboundedReceiver<Report>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                Some(report) = reports.recv() => {
                    self.apply(report);
                    self.publish();
                }
            }
        }

        tracing::debug!(in_flight = self.tokens.len(), "scheduler stopped");
        for token in self.tokens.values() {
            token.cancel();
        }
    }

    /// コマンドを適用する。返信は変更を配信してから送る。
    fn handle(&mut self, command: Command) {
        match command {
            Command::Enqueue { file, reply } => {
                let name = file.metadata().name().to_string();
                let id = self.queue.add_item(file);
                tracing::info!(file = %name, %id, "queued");
                self.publish();
                let _ = reply.send(id);
            }
            #[cfg(test)]
            Command::Remove { id, reply } => {
                if self
                    .queue
                    .get(id)
                    .is_some_and(|item| item.status() == UploadStatus::Uploading)
                {
                    tracing::warn!(%id, "removing an item whose transfer is still running");
                }
                let removed = self.queue.remove_item(id);
                self.publish();
                let _ = reply.send(removed);
            }
            #[cfg(test)]
            Command::Cancel { id, reply } => {
                let outcome = self.queue.request_cancel(id);
                if outcome == CancelOutcome::AbortRequested {
                    self.abort(id);
                }
                self.publish();
                let _ = reply.send(outcome);
            }
            Command::CancelAll { reply } => {
                let aborting = self.queue.cancel_all();
                for id in &aborting {
                    self.abort(*id);
                }
                tracing::info!(aborting = aborting.len(), "cancelling all uploads");
                self.publish();
                let _ = reply.send(aborting.len());
            }
            Command::Retry { id, reply } => {
                let retried = self.queue.retry(id);
                if retried {
                    tracing::info!(%id, "retrying");
                }
                self.publish();
                let _ = reply.send(retried);
            }
            Command::SetLimit { limit, reply } => {
                let result = self.queue.set_max_concurrent_uploads(limit);
                self.publish();
                let _ = reply.send(result);
            }
            Command::Reset { reply } => {
                for (_, token) in self.tokens.drain() {
                    token.cancel();
                }
                let removed = self.queue.reset();
                self.publish();
                let _ = reply.send(removed);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.queue.snapshot());
            }
            Command::Shutdown => {}
        }
    }

    /// 実行中の転送に中断を要求する（確認は `InfraError::Aborted` の報告で届く）
    fn abort(&self, id: ItemId) {
        if let Some(token) = self.tokens.get(&id) {
            token.cancel();
        }
    }

    fn apply(&mut self, report: Report) {
        match report {
            Report::Progress { id, loaded, total } => {
                self.queue.update_progress(id, loaded, total);
            }
            Report::Finished { id, outcome } => {
                self.tokens.remove(&id);
                let name = self
                    .queue
                    .get(id)
                    .map(|item| item.metadata().name().to_string())
                    .unwrap_or_default();

                match outcome {
                    Ok(response) => {
                        if self.queue.complete(id, response) {
                            tracing::info!(file = %name, "upload completed");
                        }
                    }
                    Err(InfraError::Aborted) => {
                        if self.queue.set_status(id, UploadStatus::Cancelled, None) {
                            tracing::info!(file = %name, "upload cancelled");
                        }
                    }
                    Err(error) => {
                        tracing::warn!(file = %name, %error, "upload failed");
                        self.queue
                            .set_status(id, UploadStatus::Failed, Some(error.to_string()));
                    }
                }
            }
        }
    }

    /// 蓄積された変更を配信し、受け入れられたアイテムの転送を開始する
    fn publish(&mut self) {
        let mut changes = self.queue.take_changes();
        if changes.is_empty() {
            return;
        }

        while !changes.is_empty() {
            for event in changes.events {
                // 購読者がいなくても構わない
                let _ = self.events.send(event);
            }
            for id in changes.admitted {
                self.start(id);
            }
            // 開始に失敗したアイテムの遷移を拾う
            changes = self.queue.take_changes();
        }

        self.snapshots.send_replace(self.queue.snapshot());
    }

    fn start(&mut self, id: ItemId) {
        let Some(item) = self.queue.get(id) else {
            return;
        };
        let Some(source) = item.source().cloned() else {
            self.queue.set_status(
                id,
                UploadStatus::Failed,
                Some("file source is no longer available".to_string()),
            );
            return;
        };

        let file = TransferFile {
            source,
            metadata: item.metadata().clone(),
        };
        tracing::info!(file = file.metadata.name(), size = file.metadata.size(), "upload started");

        let token = CancellationToken::new();
        self.tokens.insert(id, token.clone());

        let transport = Arc::clone(&self.transport);
        let reports = self.reports.clone();
        let limit = self.transfer_timeout;

        tokio::spawn(async move {
            let name = file.metadata.name().to_string();
            let sink = Arc::new(ReportSink {
                id,
                reports: reports.clone(),
            });

            let outcome = match tokio::time::timeout(limit, transport.upload(file, sink, token)).await {
                Ok(result) => result,
                Err(_) => Err(InfraError::timeout(format!("upload of {}", name))),
            };
            let _ = reports.send(Report::Finished { id, outcome });
        });
    }
}
