/// ユーザー設定モジュール
///
/// 実行時にユーザーディレクトリから読み込まれる動的設定を管理します。
/// Windows: C:\Users\<User>\AppData\Roaming\meshdrop\config.toml
/// macOS:   /Users/<User>/Library/Application Support/meshdrop/config.toml
/// Linux:   /home/<user>/.config/meshdrop/config.toml
///
/// 初回起動時にデフォルト値から自動的にconfig.tomlを作成します。
/// `[upload]` セクションはビルド時設定に対する上書きパッチとして扱われます。
use crate::config::error::ConfigError;
use crate::config::settings::{SettingsPatch, UploadSettings};
use crate::config::APP_CONFIG;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// ユーザー設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    /// 取り込みサービスのベースURL（未設定ならビルド時設定を使用）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// アップロード設定の上書き
    #[serde(default)]
    pub upload: SettingsPatch,
}

impl UserConfig {
    /// ユーザー設定ファイルのパスを取得
    ///
    /// # Errors
    /// ホームディレクトリが取得できない場合に ConfigError::DirectoryNotFound を返します。
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .ok_or_else(|| ConfigError::directory_not_found("Failed to get user config directory"))
            .map(|config_dir| config_dir.join("meshdrop").join("config.toml"))
    }

    /// ユーザー設定を読み込む
    ///
    /// 設定ファイルが存在しない場合は、デフォルトテンプレートから自動的に作成します。
    /// 読み込み後、自動的に検証を実行します（Fail Fast）。
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path()?)
    }

    /// 指定パスからユーザー設定を読み込む
    pub fn load_from(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            Self::create_default_config(config_path)?;
        }

        let content = fs::read_to_string(config_path).map_err(|e| {
            ConfigError::file_system(
                format!("Failed to read config file: {}", config_path.display()),
                e,
            )
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            ConfigError::parse_error(
                format!("Failed to parse config file ({})", config_path.display()),
                e,
            )
        })?;

        // 自動検証（Fail Fast）
        config.validate()?;

        Ok(config)
    }

    /// デフォルト設定ファイルを作成
    fn create_default_config(config_path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ConfigError::file_system(
                    format!("Failed to create config directory: {}", parent.display()),
                    e,
                )
            })?;
        }

        fs::write(config_path, Self::default_toml_content()).map_err(|e| {
            ConfigError::file_system(
                format!("Failed to create default config file: {}", config_path.display()),
                e,
            )
        })?;

        Ok(())
    }

    /// デフォルトTOML設定を生成
    ///
    /// 上書き項目はすべてコメントアウトした状態で出力し、
    /// 有効値はビルド時設定から表示します。
    fn default_toml_content() -> String {
        let defaults = &APP_CONFIG.upload;
        format!(
            r#"# meshdrop - User Configuration
# Values here override the built-in defaults. Change them with 'meshdrop config set'.

# endpoint = "{}"

[upload]
# max_file_size = {}
# max_concurrent_uploads = {}
# strict_mime_validation = {}
# allowed_extensions = [{}]
"#,
            APP_CONFIG.api.endpoint,
            defaults.max_file_size,
            defaults.max_concurrent_uploads,
            defaults.strict_mime_validation,
            defaults
                .allowed_extensions
                .iter()
                .map(|e| format!("\"{}\"", e))
                .collect::<Vec<_>>()
                .join(", "),
        )
    }

    /// 指定パスの設定ファイルをデフォルトテンプレートで作り直す
    pub fn reset_at(config_path: &Path) -> Result<Self, ConfigError> {
        Self::create_default_config(config_path)?;
        Self::load_from(config_path)
    }

    /// 指定パスにユーザー設定を保存する
    pub fn save_to(&self, config_path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ConfigError::file_system(
                    format!("Failed to create config directory: {}", parent.display()),
                    e,
                )
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::serialize_error("Failed to serialize config", e))?;

        fs::write(config_path, content).map_err(|e| {
            ConfigError::file_system(
                format!("Failed to write config file: {}", config_path.display()),
                e,
            )
        })?;

        Ok(())
    }

    /// ユーザー設定を検証
    ///
    /// 上書きパッチを既定値へ適用できること、エンドポイントが空でないことを確認します。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(endpoint) = &self.endpoint
            && endpoint.trim().is_empty()
        {
            return Err(ConfigError::validation_error("endpoint cannot be empty"));
        }
        self.effective_settings()?;
        Ok(())
    }

    /// 既定値に上書きパッチを適用した有効設定を返す
    pub fn effective_settings(&self) -> Result<UploadSettings, ConfigError> {
        UploadSettings::default().merged(&self.upload)
    }

    /// 使用するエンドポイントを返す
    pub fn endpoint(&self) -> &str {
        self.endpoint
            .as_deref()
            .unwrap_or(APP_CONFIG.api.endpoint.as_str())
    }

    /// 1項目を変更する
    ///
    /// 変更後の設定が無効な場合はエラーを返し、`self` は変更されません。
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        if key == "endpoint" {
            let mut next = self.clone();
            next.endpoint = Some(value.trim().to_string());
            next.validate()?;
            *self = next;
            return Ok(());
        }

        let mut patch = SettingsPatch::default();
        patch.set(key, value)?;

        let mut next_patch = self.upload.clone();
        next_patch.overlay(patch);
        UploadSettings::default().merged(&next_patch)?;

        self.upload = next_patch;
        Ok(())
    }
}
