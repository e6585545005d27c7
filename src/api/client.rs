/// HTTPトランスポート
///
/// アップロードサービスとの通信を担当するHTTPクライアント。
/// ファイルはmultipartでストリーミング送信し、送信済みバイト数を進捗として通知します。
/// タイムアウト、エラー応答の解析、協調的な中断を含みます。
use crate::api::error::InfraError;
use crate::api::transport::{ProgressSink, TransferFile, UploadTransport};
use crate::api::types::{ErrorResponse, PreflightResponse};
use crate::config::APP_CONFIG;
use crate::domain::metadata::{FileMetadata, FileSource};
use crate::domain::validator::ValidationResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

/// APIクライアントの結果型
type ApiResult<T> = Result<T, InfraError>;

/// 送信ボディのストリーム（reqwestの要求でSyncが必要）
type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync>>;

/// 1チャンクのバイト数（進捗通知の粒度）
const CHUNK_SIZE: usize = 64 * 1024;

/// HTTPトランスポート
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// 新しいトランスポートを作成
    ///
    /// # Arguments
    /// * `base_url` - サービスのベースURL（例: "http://localhost:5000"）
    ///
    /// 接続にだけタイムアウトを掛け、転送全体の上限はスケジューラ側で掛ける。
    pub fn new(base_url: impl Into<String>) -> ApiResult<Self> {
        let timeout = Duration::from_secs(APP_CONFIG.api.timeout_seconds);

        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| InfraError::network(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    /// URLを構築
    fn build_url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// バイトソースを読み込みストリームにする
    async fn open_stream(source: &FileSource) -> io::Result<ByteStream> {
        match source {
            FileSource::Path(path) => {
                let file = tokio::fs::File::open(path).await?;
                Ok(Box::pin(ReaderStream::with_capacity(file, CHUNK_SIZE)))
            }
            FileSource::Memory(bytes) => {
                let chunks: Vec<io::Result<Bytes>> = (0..bytes.len())
                    .step_by(CHUNK_SIZE)
                    .map(|start| Ok(bytes.slice(start..(start + CHUNK_SIZE).min(bytes.len()))))
                    .collect();
                Ok(Box::pin(stream::iter(chunks)))
            }
        }
    }

    /// multipartのファイルパートを構築
    ///
    /// `progress` を渡すと、チャンクが読み出されるたびに累計バイト数を通知する。
    async fn file_part(
        source: &FileSource,
        metadata: &FileMetadata,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> ApiResult<Part> {
        let total = metadata.size();
        let body = Self::open_stream(source).await?;

        let body: ByteStream = match progress {
            Some(sink) => {
                let mut sent: u64 = 0;
                Box::pin(body.map(move |chunk| {
                    if let Ok(bytes) = &chunk {
                        sent += bytes.len() as u64;
                        sink.report(sent.min(total), total);
                    }
                    chunk
                }))
            }
            None => body,
        };

        let mime_type = metadata
            .mime_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        Part::stream_with_length(Body::wrap_stream(body), total)
            .file_name(metadata.name().to_string())
            .mime_str(&mime_type)
            .map_err(|e| InfraError::network(format!("Invalid content type '{}': {}", mime_type, e)))
    }

    /// リクエストを送信し、エラーハンドリングを行う
    async fn send_with_error_handling(
        request: reqwest::RequestBuilder,
        endpoint: &str,
        method: &str,
    ) -> ApiResult<Response> {
        request.send().await.map_err(|e| {
            if e.is_timeout() {
                InfraError::timeout(format!("{} {}", method, endpoint))
            } else if e.is_connect() {
                InfraError::network(format!("Connection failed for {} {}: {}", method, endpoint, e))
            } else {
                InfraError::network(format!("Request failed for {} {}: {}", method, endpoint, e))
            }
        })
    }

    /// レスポンスをチェックしてエラーを返す
    ///
    /// エラー本文がサービスのエラー形式ならそのメッセージを、
    /// そうでなければ本文をそのまま使う。
    pub async fn check_response(response: Response, endpoint: &str) -> ApiResult<Response> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let status_code = status.as_u16();
        let error_body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error response".to_string());

        let message = serde_json::from_str::<ErrorResponse>(&error_body)
            .ok()
            .and_then(|r| r.summary())
            .unwrap_or_else(|| {
                if error_body.trim().is_empty() {
                    format!("HTTP {}", status_code)
                } else {
                    error_body
                }
            });

        Err(InfraError::api(endpoint, message, Some(status_code)))
    }

    /// JSONレスポンスをデシリアライズ
    pub async fn parse_json<T: serde::de::DeserializeOwned>(response: Response) -> ApiResult<T> {
        response
            .json()
            .await
            .map_err(|e| InfraError::network(format!("Failed to parse JSON response: {}", e)))
    }

    /// サーバー側の検証だけを実行する（アップロードはしない）
    ///
    /// 応答はローカル検証と同じ `ValidationResult` の形に変換する。
    pub async fn preflight(
        &self,
        source: &FileSource,
        metadata: &FileMetadata,
    ) -> ApiResult<ValidationResult> {
        let endpoint = APP_CONFIG.api.validate_path.as_str();
        let part = Self::file_part(source, metadata, None).await?;
        let form = Form::new().part(APP_CONFIG.api.file_field.clone(), part);

        let request = self
            .client
            .post(self.build_url(endpoint))
            .timeout(Duration::from_secs(APP_CONFIG.api.timeout_seconds))
            .multipart(form);

        let response = Self::send_with_error_handling(request, endpoint, "POST").await?;
        let response = Self::check_response(response, endpoint).await?;
        let body: PreflightResponse = Self::parse_json(response).await?;

        tracing::debug!(
            file = metadata.name(),
            valid = body.validation_result,
            "pre-flight validation finished"
        );

        let mut errors = body.errors;
        if !body.validation_result && errors.is_empty() {
            errors.push(format!("rejected by server: {}", metadata.name()));
        }

        Ok(ValidationResult::new(errors, body.warnings, metadata.clone()))
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn upload(
        &self,
        file: TransferFile,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> ApiResult<serde_json::Value> {
        let endpoint = APP_CONFIG.api.upload_path.as_str();
        let total = file.metadata.size();

        let part = Self::file_part(&file.source, &file.metadata, Some(progress.clone())).await?;
        let form = Form::new().part(APP_CONFIG.api.file_field.clone(), part);
        let request = self.client.post(self.build_url(endpoint)).multipart(form);

        let exchange = async {
            let response = Self::send_with_error_handling(request, endpoint, "POST").await?;
            let response = Self::check_response(response, endpoint).await?;
            Self::parse_json::<serde_json::Value>(response).await
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(file = file.metadata.name(), "transfer aborted");
                Err(InfraError::Aborted)
            }
            result = exchange => {
                if result.is_ok() {
                    progress.report(total, total);
                }
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metadata::FileIngestor;
    use std::sync::Mutex;

    /// 通知された進捗を記録するシンク
    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<(u64, u64)>>);

    impl ProgressSink for RecordingSink {
        fn report(&self, loaded: u64, total: u64) {
            self.0.lock().unwrap().push((loaded, total));
        }
    }

    fn transfer_file(size: usize) -> TransferFile {
        let mut bytes = b"solid cube\n".to_vec();
        bytes.resize(size, b' ');
        let candidate = FileIngestor::new().from_bytes("cube.stl", bytes, Some("model/stl".to_string()));
        TransferFile {
            source: candidate.source,
            metadata: candidate.metadata,
        }
    }

    #[test]
    fn test_transport_creation() {
        let transport = HttpTransport::new("http://localhost:5000/");
        assert!(transport.is_ok());
        assert_eq!(
            transport.unwrap().build_url("/api/v1/upload/stl"),
            "http://localhost:5000/api/v1/upload/stl"
        );
    }

    #[tokio::test]
    async fn test_upload_success_reports_progress() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/upload/stl")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": true, "file_id": "abc123", "filename": "cube.stl"}"#)
            .create_async()
            .await;

        let transport = HttpTransport::new(server.url()).unwrap();
        let sink = Arc::new(RecordingSink::default());
        let size = CHUNK_SIZE * 2 + 10;

        let response = transport
            .upload(transfer_file(size), sink.clone(), CancellationToken::new())
            .await
            .expect("upload should succeed");

        mock.assert_async().await;
        assert_eq!(response["file_id"], "abc123");

        let reports = sink.0.lock().unwrap();
        assert_eq!(reports.last(), Some(&(size as u64, size as u64)));
        assert!(reports.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[tokio::test]
    async fn test_upload_error_body_is_parsed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/upload/stl")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": false, "error": {"message": "Invalid STL file", "details": []}}"#)
            .create_async()
            .await;

        let transport = HttpTransport::new(server.url()).unwrap();
        let err = transport
            .upload(transfer_file(100), Arc::new(RecordingSink::default()), CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            InfraError::Api {
                message,
                status_code,
                ..
            } => {
                assert_eq!(message, "Invalid STL file");
                assert_eq!(status_code, Some(400));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_upload_error_falls_back_to_raw_text() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/upload/stl")
            .with_status(502)
            .with_body("Bad Gateway")
            .create_async()
            .await;

        let transport = HttpTransport::new(server.url()).unwrap();
        let err = transport
            .upload(transfer_file(100), Arc::new(RecordingSink::default()), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Bad Gateway"));
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts() {
        let server = mockito::Server::new_async().await;
        let transport = HttpTransport::new(server.url()).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = transport
            .upload(transfer_file(100), Arc::new(RecordingSink::default()), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, InfraError::Aborted));
    }

    #[tokio::test]
    async fn test_preflight_maps_to_validation_result() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/upload/validate")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"validation_result": false, "errors": ["Invalid file format"], "file_info": {"filename": "cube.stl"}}"#,
            )
            .create_async()
            .await;

        let transport = HttpTransport::new(server.url()).unwrap();
        let candidate = FileIngestor::new().from_bytes("cube.stl", b"solid cube\n".to_vec(), None);

        let result = transport
            .preflight(&candidate.source, &candidate.metadata)
            .await
            .unwrap();
        assert!(!result.is_valid());
        assert_eq!(result.errors(), &["Invalid file format".to_string()]);
        assert_eq!(result.metadata().name(), "cube.stl");
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        // 閉じたポート
        let transport = HttpTransport::new("http://127.0.0.1:9").unwrap();
        let err = transport
            .upload(transfer_file(100), Arc::new(RecordingSink::default()), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, InfraError::Network { .. }));
    }
}
