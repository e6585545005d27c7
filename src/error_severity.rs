//! 終了コードの分類
//!
//! どのレイヤーのエラーも最終的にこの3分類のどれかになり、
//! `main` がプロセスの終了コードを、`--machine` モードが
//! エラーJSONの `severity` フィールドを決める。
//!
//! domain / api / config / scheduler の各エラー型は `severity()` でここへ写像する。
//! このモジュール自身はどのレイヤーにも依存しない。

use serde::Serialize;

/// エラーの分類
///
/// | 分類 | 終了コード | 例 |
/// |---|---|---|
/// | `UserError` | 1 | ファイルが存在しない、拡張子が対象外、サーバーが4xxで拒否 |
/// | `ConfigError` | 2 | 許可リストが空、同時アップロード数が0、config.tomlが壊れている |
/// | `SystemError` | 3 | 接続失敗、5xx、転送タイムアウト |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    UserError,
    ConfigError,
    SystemError,
}

impl ErrorSeverity {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::UserError => 1,
            Self::ConfigError => 2,
            Self::SystemError => 3,
        }
    }
}
