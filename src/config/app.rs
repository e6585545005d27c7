/// アプリケーション設定モジュール
///
/// ビルド時に config.toml から読み込まれる静的設定を管理します。
/// これらの設定は実行時には変更できません。
/// 実行時に変更可能なアップロード設定は `settings` モジュールが扱い、
/// ここで定義した `[upload]` セクションはその初期値として使われます。
use serde::Deserialize;
use std::sync::LazyLock;

/// MB換算に使う1MBあたりのバイト数（10進）
pub const BYTES_PER_MB: f64 = 1_000_000.0;

/// プロセス全体で共有するビルド時設定
pub static APP_CONFIG: LazyLock<AppConfig> = LazyLock::new(AppConfig::load);

/// アプリケーション全体の設定
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub upload: UploadDefaults,
    pub logging: LoggingConfig,
}

/// API関連の設定
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// 取り込みサービスのベースURL
    pub endpoint: String,

    /// アップロードエンドポイントのパス
    pub upload_path: String,

    /// 事前検証エンドポイントのパス
    pub validate_path: String,

    /// multipartのファイルフィールド名
    pub file_field: String,

    /// 接続とプリフライト要求のタイムアウト(秒)
    pub timeout_seconds: u64,

    /// 1件の転送全体に許す最大時間(秒)
    ///
    /// トランスポートが応答しない場合でもこの時間で打ち切り、failedとして扱う。
    pub transfer_timeout_seconds: u64,
}

/// アップロード設定の初期値
#[derive(Debug, Clone, Deserialize)]
pub struct UploadDefaults {
    /// アップロード可能な最大ファイルサイズ (バイト)
    pub max_file_size: u64,

    /// 対応する拡張子（先頭のドット付き）
    pub allowed_extensions: Vec<String>,

    /// 受け付けるMIMEタイプ
    pub allowed_mime_types: Vec<String>,

    /// MIMEタイプ不一致をエラーとして扱うか
    pub strict_mime_validation: bool,

    /// 同時アップロード数の上限
    pub max_concurrent_uploads: usize,
}

/// ロギング関連の設定
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// RUST_LOG未設定時のログレベル (trace, debug, info, warn, error)
    pub level: String,
}

impl AppConfig {
    /// ビルド時に埋め込まれたconfig.tomlから設定を読み込む
    ///
    /// # Panics
    /// 設定ファイルのパースに失敗した場合はパニックします。
    /// これはビルド時設定なので、実行時エラーではなくコンパイルエラーとして扱うべきです。
    pub fn load() -> Self {
        const CONFIG_STR: &str = include_str!("../../config.toml");
        toml::from_str(CONFIG_STR)
            .expect("Failed to parse embedded config.toml. This is a build-time configuration error.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config() {
        // ビルド時設定が正しく読み込まれることを確認
        let config = AppConfig::load();
        assert_eq!(config.api.upload_path, "/api/v1/upload/stl");
        assert_eq!(config.api.validate_path, "/api/v1/upload/validate");
        assert_eq!(config.api.file_field, "file");
        assert!(config.api.timeout_seconds > 0);
    }

    #[test]
    fn test_upload_defaults() {
        let upload = &APP_CONFIG.upload;
        assert_eq!(upload.max_file_size, 100 * 1024 * 1024);
        assert_eq!(upload.max_concurrent_uploads, 3);
        assert!(upload.allowed_extensions.iter().any(|e| e == ".stl"));
        assert!(upload.allowed_extensions.iter().any(|e| e == ".obj"));
        assert!(upload.allowed_extensions.iter().any(|e| e == ".ply"));
        assert!(!upload.strict_mime_validation);
    }
}
