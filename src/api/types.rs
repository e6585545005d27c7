/// API通信用の型定義
///
/// アップロードサービスのレスポンスをデシリアライズするための構造体を定義します。
/// 成功時のアップロード応答は形が固定されていないため `serde_json::Value` のまま保持し、
/// ここではエラー応答とプリフライト応答だけを型付けします。
use serde::Deserialize;
use serde_json::Value;

/// エラー応答
///
/// 次の2つの形のどちらか:
/// - `{"success": false, "error": {"message": "...", "details": [...]}}`
/// - `{"success": false, "message": "...", "errors": [...]}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub error: Option<ErrorDetail>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub errors: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Vec<Value>,
}

impl ErrorResponse {
    /// 人間向けの1行メッセージにまとめる
    ///
    /// メッセージが見つからない場合は `None`（呼び出し側で生の本文を使う）。
    pub fn summary(&self) -> Option<String> {
        let (message, details) = match &self.error {
            Some(detail) => (detail.message.as_deref(), detail.details.as_slice()),
            None => (self.message.as_deref(), self.errors.as_slice()),
        };

        let message = message.filter(|m| !m.trim().is_empty())?;
        let details: Vec<String> = details.iter().map(value_text).collect();

        if details.is_empty() {
            Some(message.to_string())
        } else {
            Some(format!("{} ({})", message, details.join("; ")))
        }
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// プリフライト検証の応答
///
/// POST /api/v1/upload/validate のレスポンス型
#[derive(Debug, Clone, Deserialize)]
pub struct PreflightResponse {
    pub validation_result: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// アップロード応答からサーバーが割り当てたIDを取り出す
///
/// `file_id` を優先し、なければ `session_id`。
pub fn upload_id(response: &Value) -> Option<&str> {
    response
        .get("file_id")
        .or_else(|| response.get("session_id"))
        .and_then(Value::as_str)
}

/// サーバーが記録した内容のSHA-256（`file_metadata.file_hash`）
pub fn reported_hash(response: &Value) -> Option<&str> {
    response
        .get("file_metadata")
        .and_then(|metadata| metadata.get("file_hash"))
        .and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_error_with_details() {
        let json = r#"{
            "success": false,
            "error": {"message": "File validation failed", "details": ["Invalid STL header"]}
        }"#;
        let response: ErrorResponse = serde_json::from_str(json).expect("Failed to parse");

        assert_eq!(
            response.summary().as_deref(),
            Some("File validation failed (Invalid STL header)")
        );
    }

    #[test]
    fn test_flat_error() {
        let json = r#"{"success": false, "message": "Upload failed", "errors": []}"#;
        let response: ErrorResponse = serde_json::from_str(json).expect("Failed to parse");

        assert_eq!(response.summary().as_deref(), Some("Upload failed"));
    }

    #[test]
    fn test_no_message_yields_none() {
        let response: ErrorResponse = serde_json::from_str("{}").expect("Failed to parse");
        assert!(response.summary().is_none());
    }

    #[test]
    fn test_preflight_response() {
        let json = r#"{
            "validation_result": false,
            "errors": ["Invalid file format"],
            "file_info": {"filename": "cube.stl", "size": 684}
        }"#;
        let response: PreflightResponse = serde_json::from_str(json).expect("Failed to parse");

        assert!(!response.validation_result);
        assert_eq!(response.errors, vec!["Invalid file format"]);
        assert!(response.warnings.is_empty());
    }

    #[test]
    fn test_upload_id_prefers_file_id() {
        let value = serde_json::json!({"file_id": "f1", "session_id": "s1"});
        assert_eq!(upload_id(&value), Some("f1"));

        let value = serde_json::json!({"session_id": "s1"});
        assert_eq!(upload_id(&value), Some("s1"));

        assert_eq!(upload_id(&serde_json::json!({})), None);
    }

    #[test]
    fn test_reported_hash() {
        let value = serde_json::json!({
            "success": true,
            "session_id": "s1",
            "file_metadata": {"filename": "cube.stl", "file_hash": "ab12"}
        });
        assert_eq!(reported_hash(&value), Some("ab12"));
        assert_eq!(reported_hash(&serde_json::json!({"file_id": "f1"})), None);
    }
}
