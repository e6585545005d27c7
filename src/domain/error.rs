/// ドメイン層のエラー定義
///
/// 検証パイプラインが判定する制約違反を構造化して定義。
/// 外部クレートのエラーは含まず、純粋にドメインの制約違反を表現する。
///
/// `DomainError` は候補ファイルをキューに入れられない理由（ブロッキング）、
/// `ValidationWarning` は情報提供のみの警告（非ブロッキング）を表す。
/// どちらも `Display` の文字列が `ValidationResult` の errors / warnings に入る。
use crate::error_severity::ErrorSeverity;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// ファイルが見つからない
    #[error("file not found: {path}")]
    FileNotFound { path: String },

    /// ディレクトリが指定された（ファイルが期待される場所）
    #[error("'{path}' is a directory, not a file")]
    NotAFile { path: String },

    /// ファイルが空
    #[error("file is empty: {name}")]
    EmptyFile { name: String },

    /// ファイルサイズが制限を超過（MB表記は小数点以下2桁）
    #[error("file too large: {size_mb} MB (maximum allowed: {max_mb} MB)")]
    FileTooLarge { size_mb: String, max_mb: String },

    /// 拡張子がない
    #[error("file has no extension: {name}")]
    MissingExtension { name: String },

    /// ファイル形式が無効
    #[error("invalid file format: {name} (expected: {expected}, found: {found})")]
    InvalidFormat {
        name: String,
        expected: String,
        found: String,
    },

    /// MIMEタイプが申告されていない（strictモードのみ）
    #[error("file type could not be determined: {name}")]
    MissingMimeType { name: String },

    /// 許可されていないMIMEタイプ（strictモードのみ）
    #[error("unsupported file type: {mime_type} ({name})")]
    UnsupportedMimeType { name: String, mime_type: String },

    /// 構造検査で1バイトも読めなかった
    #[error("file appears to be empty or corrupted: {name}")]
    Corrupted { name: String },

    /// 入力を読み込めなかった
    #[error("could not read {name}: {reason}")]
    Unreadable { name: String, reason: String },
}

impl DomainError {
    /// 無効なファイル形式エラーを生成
    pub fn invalid_format(
        name: impl Into<String>,
        accepted: &[String],
        found: impl Into<String>,
    ) -> Self {
        Self::InvalidFormat {
            name: name.into(),
            expected: format!("one of: {}", accepted.join(", ")),
            found: found.into(),
        }
    }

    /// エラーの深刻度を返す
    ///
    /// ドメインエラーはすべてユーザーが直せる入力の問題として扱う
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::UserError
    }

    /// ユーザー向けのヒントメッセージを返す
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::FileNotFound { .. } => {
                Some("Please check the file path and ensure the file exists.")
            }
            Self::NotAFile { .. } => Some("Please specify a file, not a directory."),
            Self::Unreadable { .. } => Some("Please check that the input is readable."),
            Self::EmptyFile { .. } | Self::Corrupted { .. } => {
                Some("The file appears to be empty or corrupted. Re-export it from your modelling tool.")
            }
            Self::FileTooLarge { .. } => {
                Some("Try decimating the mesh or exporting as binary STL to reduce the file size.")
            }
            Self::MissingExtension { .. } | Self::InvalidFormat { .. } => {
                Some("Supported formats: .stl, .obj, .ply")
            }
            Self::MissingMimeType { .. } | Self::UnsupportedMimeType { .. } => Some(
                "Strict MIME validation is enabled. Disable it with 'meshdrop config set strict_mime_validation false'.",
            ),
        }
    }
}

/// 非ブロッキングの検証警告
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationWarning {
    /// 最大サイズの半分を超えている
    #[error("large file: {size_mb} MB is more than half of the {max_mb} MB limit")]
    LargeFile { size_mb: String, max_mb: String },

    /// 許可リストにないMIMEタイプ（サーバー側で再検証される）
    #[error("unexpected file type '{mime_type}' for {name}; the server will re-validate it")]
    UnexpectedMimeType { name: String, mime_type: String },

    /// ASCII/バイナリどちらのSTLにも見えない
    #[error("{name} does not look like an ASCII or binary STL file")]
    UnrecognizedStl { name: String },

    /// バイナリSTLの三角形数と実サイズが一致しない
    #[error(
        "{name}: binary STL header declares {triangles} triangles ({expected} bytes) but the file is {actual} bytes"
    )]
    StlSizeMismatch {
        name: String,
        triangles: u32,
        expected: u64,
        actual: u64,
    },

    /// OBJの文が見当たらない
    #[error("{name} contains no recognizable OBJ statements in its header")]
    MissingObjStatements { name: String },

    /// PLYのマジックがない
    #[error("{name} does not start with the 'ply' magic")]
    MissingPlyMagic { name: String },

    /// ヘッダーを読めなかった（構造検査をスキップ）
    #[error("could not inspect {name}: {reason}; structural checks skipped")]
    UnreadableHeader { name: String, reason: String },

    /// プリフライト検証に到達できなかった（ローカル検証の結果だけで送る）
    #[error("pre-flight validation unavailable for {name}: {reason}; uploading anyway")]
    PreflightUnavailable { name: String, reason: String },

    /// サーバーが記録したハッシュとローカルの内容が一致しない
    #[error("{name}: server recorded SHA-256 {reported} but the local file is {local}")]
    HashMismatch {
        name: String,
        reported: String,
        local: String,
    },
}
