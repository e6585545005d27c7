/// 転送の抽象
///
/// スケジューラはこのトレイトだけに依存し、HTTPの詳細を知らない。
/// 中断は `CancellationToken` による協調的な契約で、実装は中断に応じたら
/// `InfraError::Aborted` を返すこと（それが中断の確認になる）。
use crate::api::error::InfraError;
use crate::domain::metadata::{FileMetadata, FileSource};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 転送対象のファイル
#[derive(Debug, Clone)]
pub struct TransferFile {
    pub source: FileSource,
    pub metadata: FileMetadata,
}

/// 送信済みバイト数の通知先
pub trait ProgressSink: Send + Sync {
    fn report(&self, loaded: u64, total: u64);
}

#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// ファイルを送信し、成功時はサーバーの応答をそのまま返す
    async fn upload(
        &self,
        file: TransferFile,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, InfraError>;
}
