/// 設定管理モジュール
///
/// このモジュールは3つの設定構造を提供します:
/// 1. AppConfig - ビルド時に埋め込まれる静的設定（APP_CONFIG）
/// 2. UserConfig - 実行時に読み込まれる動的設定（上書きパッチ）
/// 3. UploadSettings - 上の2つを合成した、検証済みの有効設定
///
/// # 使用例
///
/// ```rust,ignore
/// use crate::config::{APP_CONFIG, UserConfig};
///
/// // AppConfig: グローバル定数として直接参照
/// let endpoint = &APP_CONFIG.api.endpoint;
///
/// // UserConfig: load時に自動検証
/// let user_config = UserConfig::load()?;
/// let settings = user_config.effective_settings()?;
/// ```
pub mod app;
pub mod error;
pub mod settings;
pub mod user;

pub use app::{APP_CONFIG, BYTES_PER_MB};
pub use settings::{SettingsPatch, UploadSettings};
pub use user::UserConfig;
