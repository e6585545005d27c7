/// コマンド実行結果を表す型
///
/// 各コマンドはこの型を返し、プレゼンテーション層で
/// 人間向けと機械向けの出力フォーマットを決定する。
use crate::config::UploadSettings;
use crate::domain::item::{ItemSnapshot, UploadStatus};
use crate::domain::validator::ValidationResult;
use crate::error_severity::ErrorSeverity;
use serde::Serialize;

/// コマンド実行結果の統一型
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandResult {
    Validate(ValidateResult),
    Upload(UploadResult),
    Config(ConfigResult),
    Help,
}

/// validateコマンドの結果
#[derive(Debug, Clone, Serialize)]
pub struct ValidateResult {
    /// 入力順の検証結果
    pub results: Vec<ValidationResult>,
}

impl ValidateResult {
    pub fn invalid_count(&self) -> usize {
        self.results.iter().filter(|r| !r.is_valid()).count()
    }
}

/// uploadコマンドの結果
#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    /// 検証（ローカルまたはプリフライト）で弾かれたファイル
    pub rejected: Vec<ValidationResult>,
    /// 通過したファイルの検証警告
    pub warnings: Vec<String>,
    /// キューに入ったアイテムの最終状態
    pub items: Vec<ItemSnapshot>,
    /// 全体進捗（0〜100）
    pub total_progress: f64,
    /// 失敗時に収集されたエラー（"ファイル名: エラー"）
    pub errors: Vec<String>,
    /// Ctrl-Cで中断したか
    pub interrupted: bool,
}

impl UploadResult {
    pub fn count(&self, status: UploadStatus) -> usize {
        self.items.iter().filter(|item| item.status == status).count()
    }
}

/// configコマンドの結果
#[derive(Debug, Clone, Serialize)]
pub struct ConfigResult {
    pub action: ConfigAction,
    /// 設定ファイルのパス
    pub path: String,
    /// 使用するエンドポイント
    pub endpoint: String,
    /// 有効なアップロード設定
    pub settings: UploadSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ConfigAction {
    Show,
    Set { key: String, value: String },
    Reset,
}

impl CommandResult {
    /// 成功メッセージを取得（人間向け出力用）
    pub fn success_message(&self) -> String {
        match self {
            CommandResult::Validate(r) => {
                let invalid = r.invalid_count();
                if invalid == 0 {
                    format!("All {} file(s) passed validation.", r.results.len())
                } else {
                    format!("{} of {} file(s) failed validation.", invalid, r.results.len())
                }
            }
            CommandResult::Upload(r) => {
                if r.interrupted {
                    "Upload interrupted.".to_string()
                } else if r.count(UploadStatus::Completed) == r.items.len() && r.rejected.is_empty() {
                    "Upload completed successfully!".to_string()
                } else {
                    "Upload finished with problems.".to_string()
                }
            }
            CommandResult::Config(r) => match &r.action {
                ConfigAction::Show => "Current configuration".to_string(),
                ConfigAction::Set { key, .. } => format!("Updated '{}'.", key),
                ConfigAction::Reset => "Configuration reset to defaults.".to_string(),
            },
            CommandResult::Help => "".to_string(),
        }
    }

    /// 結果に対応する終了コード（0は成功）
    ///
    /// 転送の失敗はシステムエラー、検証で弾かれたファイルはユーザーエラー。
    pub fn exit_code(&self) -> i32 {
        match self {
            CommandResult::Validate(r) if r.invalid_count() > 0 => {
                ErrorSeverity::UserError.exit_code()
            }
            CommandResult::Upload(r) => {
                if r.count(UploadStatus::Failed) > 0 {
                    ErrorSeverity::SystemError.exit_code()
                } else if !r.rejected.is_empty() || r.count(UploadStatus::Cancelled) > 0 {
                    ErrorSeverity::UserError.exit_code()
                } else {
                    0
                }
            }
            _ => 0,
        }
    }
}
