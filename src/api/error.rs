use std::io;
/// インフラ層のエラー定義
///
/// アップロードサービスとのやり取り（ネットワーク、HTTP、ファイル読み込み）で
/// 発生するエラーを構造化して定義。
/// 転送の失敗はすべてここに集約され、アイテムの failed 遷移の理由になる。
use crate::error_severity::ErrorSeverity;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InfraError {
    /// ネットワークエラー
    #[error("network error: {message}")]
    Network { message: String },

    /// サーバーがエラー応答を返した
    #[error("upload service error at {endpoint}: {message}")]
    Api {
        endpoint: String,
        message: String,
        status_code: Option<u16>,
    },

    /// タイムアウトエラー
    #[error("operation timed out: {operation}")]
    Timeout { operation: String },

    /// 中断要求により転送を止めた
    #[error("transfer aborted")]
    Aborted,

    /// アップロード元ファイルの読み込みエラー
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl InfraError {
    /// ネットワークエラーを作成
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// APIエラーを作成
    pub fn api(endpoint: impl Into<String>, message: impl Into<String>, status_code: Option<u16>) -> Self {
        Self::Api {
            endpoint: endpoint.into(),
            message: message.into(),
            status_code,
        }
    }

    /// タイムアウトエラーを作成
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// エラーの深刻度を返す
    ///
    /// 4xx はファイル側の問題（サーバー側の検証で弾かれた）なのでユーザーエラー。
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Api {
                status_code: Some(code),
                ..
            } if (400..500).contains(code) => ErrorSeverity::UserError,
            Self::Aborted => ErrorSeverity::UserError,
            _ => ErrorSeverity::SystemError,
        }
    }

    /// ユーザー向けのヒントメッセージを返す
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Network { .. } => Some(
                "Check that the upload service is reachable, or point meshdrop at another one with 'meshdrop config set endpoint <url>'.",
            ),
            Self::Timeout { .. } => {
                Some("The transfer took too long. Check your connection and retry the upload.")
            }
            Self::Api {
                status_code: Some(413),
                ..
            } => Some("The server rejected the file size. Try a smaller or binary-encoded export."),
            Self::Api {
                status_code: Some(code),
                ..
            } if *code >= 500 => Some("The upload service is having trouble. Try again later."),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_are_user_errors() {
        let err = InfraError::api("/api/v1/upload/stl", "Invalid STL file", Some(400));
        assert_eq!(err.severity(), ErrorSeverity::UserError);

        let err = InfraError::api("/api/v1/upload/stl", "Internal error", Some(500));
        assert_eq!(err.severity(), ErrorSeverity::SystemError);
        assert!(err.hint().is_some());
    }

    #[test]
    fn test_display_carries_server_message() {
        let err = InfraError::api("/api/v1/upload/stl", "Invalid STL file", Some(400));
        assert_eq!(
            err.to_string(),
            "upload service error at /api/v1/upload/stl: Invalid STL file"
        );
    }

    #[test]
    fn test_transport_failures_are_system_errors() {
        assert_eq!(InfraError::network("refused").severity(), ErrorSeverity::SystemError);
        assert_eq!(InfraError::timeout("POST /x").severity(), ErrorSeverity::SystemError);
        assert_eq!(InfraError::Aborted.to_string(), "transfer aborted");
    }
}
