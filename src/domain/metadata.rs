/// ドメインサービス: 候補ファイルの取り込み
///
/// ユーザーが選択したファイル（候補ファイル）のバイトソースと、
/// 安価に取得できるメタデータ（名前、サイズ、申告MIMEタイプ、更新時刻）を捕捉する。
/// ここではファイル内容の検査は行わない。
use crate::domain::error::DomainError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// 候補ファイルのバイトソース
///
/// アップロードアイテムがライフサイクルの間これを排他的に所有する。
/// `Memory` は参照カウントされたバッファなので複製は安価。
#[derive(Debug, Clone)]
pub enum FileSource {
    /// ローカルファイル
    Path(PathBuf),
    /// メモリ上のバッファ
    Memory(Bytes),
}

impl FileSource {
    /// 先頭から最大 `limit` バイトを読む
    pub fn read_header(&self, limit: usize) -> io::Result<Vec<u8>> {
        match self {
            Self::Path(path) => {
                let file = File::open(path)?;
                let mut header = Vec::with_capacity(limit);
                file.take(limit as u64).read_to_end(&mut header)?;
                Ok(header)
            }
            Self::Memory(bytes) => Ok(bytes[..bytes.len().min(limit)].to_vec()),
        }
    }

    /// 内容全体のSHA-256（16進小文字）
    pub fn sha256_hex(&self) -> io::Result<String> {
        let mut hasher = Sha256::new();
        match self {
            Self::Path(path) => {
                let mut file = File::open(path)?;
                let mut buf = [0u8; 8192];
                loop {
                    let n = file.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                }
            }
            Self::Memory(bytes) => hasher.update(bytes),
        }
        Ok(hex::encode(hasher.finalize()))
    }
}

/// 候補ファイルのメタデータ
///
/// 捕捉後は不変。内容ハッシュだけは検証を通過した後に付け加える。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileMetadata {
    name: String,
    size: u64,
    mime_type: Option<String>,
    extension: Option<String>,
    last_modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha256: Option<String>,
}

impl FileMetadata {
    pub fn new(
        name: impl Into<String>,
        size: u64,
        mime_type: Option<String>,
        last_modified: Option<DateTime<Utc>>,
    ) -> Self {
        let name = name.into();
        let extension = extension_of(&name).map(str::to_string);
        Self {
            name,
            size,
            mime_type,
            extension,
            last_modified,
            sha256: None,
        }
    }

    pub(crate) fn with_sha256(mut self, digest: String) -> Self {
        self.sha256 = Some(digest);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// 申告されたMIMEタイプ
    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// 最後の `.` より後ろの部分（大文字小文字はそのまま）
    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    /// 内容のSHA-256（受け入れ後に計算した場合のみ）
    pub fn sha256(&self) -> Option<&str> {
        self.sha256.as_deref()
    }
}

/// 候補ファイル（まだキューに入っていない）
#[derive(Debug, Clone)]
pub struct Candidate {
    pub source: FileSource,
    pub metadata: FileMetadata,
}

/// 候補ファイルの取り込み
///
/// ファイルシステムのメタデータだけを読む。内容は読まない。
#[derive(Debug, Clone, Default)]
pub struct FileIngestor;

impl FileIngestor {
    pub fn new() -> Self {
        Self
    }

    /// パスから候補ファイルを捕捉する
    ///
    /// # エラー
    /// - ファイルが存在しない
    /// - ディレクトリが指定された
    pub fn from_path(&self, file_path: impl AsRef<Path>) -> Result<Candidate, DomainError> {
        let path = file_path.as_ref();
        let display = path.display().to_string();

        // メタデータ取得（I/Oエラーはここでは見つからないものとして扱う）
        let fs_metadata =
            std::fs::metadata(path).map_err(|_| DomainError::FileNotFound { path: display.clone() })?;

        if fs_metadata.is_dir() {
            return Err(DomainError::NotAFile { path: display });
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(display);
        let mime_type = Some(guess_mime_type(&name).to_string());
        let last_modified = fs_metadata.modified().ok().map(DateTime::<Utc>::from);

        let source = FileSource::Path(path.to_path_buf());
        let metadata = FileMetadata::new(name, fs_metadata.len(), mime_type, last_modified);

        Ok(Candidate { source, metadata })
    }

    /// メモリ上のバッファから候補ファイルを捕捉する
    ///
    /// 申告MIMEタイプは呼び出し側（例: 標準入力ならファイル名から推定）から渡す。
    pub fn from_bytes(
        &self,
        name: impl Into<String>,
        bytes: impl Into<Bytes>,
        declared_type: Option<String>,
    ) -> Candidate {
        let bytes = bytes.into();
        let size = bytes.len() as u64;
        let source = FileSource::Memory(bytes);
        let metadata = FileMetadata::new(name, size, declared_type, None);
        Candidate { source, metadata }
    }
}

/// 最後の `.` より後ろの部分を返す（空なら `None`）
pub fn extension_of(name: &str) -> Option<&str> {
    name.rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

/// 拡張子からMIMEタイプを推定する
///
/// 不明な拡張子は `application/octet-stream` とする。
pub fn guess_mime_type(name: &str) -> &'static str {
    match extension_of(name).map(str::to_lowercase).as_deref() {
        Some("stl") => "model/stl",
        Some("obj") => "model/obj",
        Some("ply") => "model/ply",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}
