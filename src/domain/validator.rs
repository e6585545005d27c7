/// ドメインサービス: ファイルバリデーション
///
/// アップロード候補のファイルを検証する。
/// サイズ・拡張子・MIMEタイプ・構造の各チェックを1件の候補に対して実行し、
/// 結果を1つの `ValidationResult` にまとめる。
///
/// パイプラインは状態を持たない（設定を読むだけ）ので、
/// 異なる候補に対して並行に評価してよい。
use crate::config::{BYTES_PER_MB, UploadSettings};
use crate::domain::error::{DomainError, ValidationWarning};
use crate::domain::metadata::{Candidate, FileMetadata, FileSource};
use crate::domain::sniff::StructuralValidator;
use serde::Serialize;

/// ファイルのバリデーション結果
///
/// 不変条件: `is_valid` ⇔ `errors` が空。警告は `is_valid` に影響しない。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    is_valid: bool,
    errors: Vec<String>,
    warnings: Vec<String>,
    metadata: FileMetadata,
}

impl ValidationResult {
    /// エラー・警告のリストから結果を作る（`is_valid` はここで決まる）
    pub fn new(errors: Vec<String>, warnings: Vec<String>, metadata: FileMetadata) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            metadata,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }
}

/// 検証を通過した候補ファイル
///
/// `ValidationPipeline::accept` からのみ得られ、キューへの投入に必要。
#[derive(Debug, Clone)]
pub struct AcceptedFile {
    source: FileSource,
    result: ValidationResult,
}

impl AcceptedFile {
    pub fn metadata(&self) -> &FileMetadata {
        self.result.metadata()
    }

    pub fn warnings(&self) -> &[String] {
        self.result.warnings()
    }

    pub fn source(&self) -> &FileSource {
        &self.source
    }

    pub fn into_parts(self) -> (FileSource, FileMetadata) {
        (self.source, self.result.metadata)
    }

    /// 内容のSHA-256をメタデータに記録する
    ///
    /// 読み込みに失敗しても受け入れは取り消さない（ハッシュなしのまま）。
    pub fn with_content_hash(mut self) -> Self {
        match self.source.sha256_hex() {
            Ok(digest) => {
                self.result.metadata = self.result.metadata.clone().with_sha256(digest);
            }
            Err(e) => {
                tracing::warn!(file = self.metadata().name(), error = %e, "failed to hash file contents");
            }
        }
        self
    }
}

/// エラーと警告を順序どおりに集める
#[derive(Debug, Default)]
struct Findings {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Findings {
    fn error(&mut self, error: DomainError) {
        self.errors.push(error.to_string());
    }

    fn warn(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning.to_string());
    }
}

/// 検証パイプライン
#[derive(Debug, Clone, Default)]
pub struct ValidationPipeline {
    settings: UploadSettings,
    structural: StructuralValidator,
}

impl ValidationPipeline {
    pub fn new(settings: UploadSettings) -> Self {
        Self {
            settings,
            structural: StructuralValidator,
        }
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    /// 1件の候補を検証する
    ///
    /// 境界の外にエラーを投げることはなく、常に構造化された結果を返す。
    pub fn validate_file(&self, candidate: &Candidate) -> ValidationResult {
        let metadata = &candidate.metadata;
        let mut findings = Findings::default();

        self.check_size(metadata, &mut findings);
        self.check_extension(metadata, &mut findings);
        self.check_mime_type(metadata, &mut findings);

        // 空ファイルはサイズチェックで報告済みなので構造検査はしない
        if metadata.size() > 0 {
            match self.structural.inspect(&candidate.source, metadata) {
                Ok(Some(warning)) => findings.warn(warning),
                Ok(None) => {}
                Err(error) => findings.error(error),
            }
        }

        ValidationResult::new(findings.errors, findings.warnings, metadata.clone())
    }

    /// 複数の候補を検証する（入力順を保持、各結果は独立）
    pub fn validate_files(&self, candidates: &[Candidate]) -> Vec<ValidationResult> {
        candidates
            .iter()
            .map(|candidate| self.validate_file(candidate))
            .collect()
    }

    /// 検証し、通過した場合のみキュー投入用の `AcceptedFile` を返す
    pub fn accept(&self, candidate: Candidate) -> Result<AcceptedFile, ValidationResult> {
        let result = self.validate_file(&candidate);
        if result.is_valid() {
            Ok(AcceptedFile {
                source: candidate.source,
                result,
            })
        } else {
            Err(result)
        }
    }

    fn check_size(&self, metadata: &FileMetadata, findings: &mut Findings) {
        let size = metadata.size();
        let max = self.settings.max_file_size();

        if size == 0 {
            findings.error(DomainError::EmptyFile {
                name: metadata.name().to_string(),
            });
        } else if size > max {
            findings.error(DomainError::FileTooLarge {
                size_mb: format_mb(size),
                max_mb: format_mb(max),
            });
        } else if size > max / 2 {
            findings.warn(ValidationWarning::LargeFile {
                size_mb: format_mb(size),
                max_mb: format_mb(max),
            });
        }
    }

    fn check_extension(&self, metadata: &FileMetadata, findings: &mut Findings) {
        let accepted = self.settings.allowed_extensions();

        let Some(extension) = metadata.extension() else {
            findings.error(DomainError::MissingExtension {
                name: metadata.name().to_string(),
            });
            return;
        };

        let dotted = format!(".{}", extension.to_lowercase());
        if !accepted.contains(&dotted) {
            findings.error(DomainError::invalid_format(metadata.name(), accepted, dotted));
        }
    }

    fn check_mime_type(&self, metadata: &FileMetadata, findings: &mut Findings) {
        let strict = self.settings.strict_mime_validation();

        let Some(mime_type) = metadata.mime_type() else {
            if strict {
                findings.error(DomainError::MissingMimeType {
                    name: metadata.name().to_string(),
                });
            }
            return;
        };

        let normalized = mime_type.trim().to_lowercase();
        if self.settings.allowed_mime_types().contains(&normalized) {
            return;
        }

        if strict {
            findings.error(DomainError::UnsupportedMimeType {
                name: metadata.name().to_string(),
                mime_type: mime_type.to_string(),
            });
        } else {
            findings.warn(ValidationWarning::UnexpectedMimeType {
                name: metadata.name().to_string(),
                mime_type: mime_type.to_string(),
            });
        }
    }
}

/// バイト数をMB（10進）で小数点以下2桁に丸めて表示する
pub fn format_mb(bytes: u64) -> String {
    format!("{:.2}", bytes as f64 / BYTES_PER_MB)
}
