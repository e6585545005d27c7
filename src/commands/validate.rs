use crate::commands::result::{CommandResult, ValidateResult};
use crate::config::UserConfig;
use crate::domain::error::DomainError;
use crate::domain::metadata::{Candidate, FileIngestor, FileMetadata, guess_mime_type};
use crate::domain::validator::{ValidationPipeline, ValidationResult};
use anyhow::{Context, Result};
use std::io::Read;

/// validateコマンドを実行する
///
/// # 引数
/// * `file_paths` - 検証するファイルのパス
/// * `stdin_name` - 指定された場合、標準入力をこの名前のファイルとして最後に検証する
///
/// # 戻り値
/// 入力順の検証結果。無効なファイルがあってもエラーにはせず、
/// 終了コードは `CommandResult::exit_code` で決まる。
pub fn execute(file_paths: &[String], stdin_name: Option<&str>) -> Result<CommandResult> {
    let user_config = UserConfig::load()
        .context("Failed to load user configuration. Please check your config.toml file.")?;
    let settings = user_config
        .effective_settings()
        .context("Invalid upload settings")?;

    let pipeline = ValidationPipeline::new(settings);
    let ingestor = FileIngestor::new();

    let mut ingested: Vec<_> = file_paths
        .iter()
        .map(|path| ingest(&ingestor, path))
        .collect();
    if let Some(name) = stdin_name {
        ingested.push(ingest_reader(
            &ingestor,
            name,
            std::io::stdin().lock(),
            pipeline.settings().max_file_size(),
        ));
    }

    // 取り込めなかったファイルは入力順の位置に結果を先に置いておく
    let mut slots = Vec::with_capacity(ingested.len());
    let mut candidates = Vec::new();
    for entry in ingested {
        match entry {
            Ok(candidate) => {
                candidates.push(candidate);
                slots.push(None);
            }
            Err(rejected) => slots.push(Some(rejected)),
        }
    }

    let mut validated = pipeline.validate_files(&candidates).into_iter();
    let results = slots
        .into_iter()
        .filter_map(|slot| slot.or_else(|| validated.next()))
        .collect::<Vec<_>>();

    for result in &results {
        tracing::debug!(
            file = result.metadata().name(),
            valid = result.is_valid(),
            warnings = result.warnings().len(),
            "validated"
        );
    }

    Ok(CommandResult::Validate(ValidateResult { results }))
}

/// パスから候補ファイルを取り込む
///
/// 取り込みに失敗した場合（存在しない、ディレクトリなど）は、
/// そのエラーを持つ無効な検証結果として返す。
pub(crate) fn ingest(ingestor: &FileIngestor, path: &str) -> Result<Candidate, ValidationResult> {
    ingestor
        .from_path(path)
        .map_err(|e| rejected(path, e))
}

/// リーダー（標準入力）の内容を `name` という名前の候補ファイルとして取り込む
///
/// 読み込みは `max_file_size` を1バイト超えた時点で打ち切る。
/// その場合サイズ検査で弾かれる。
pub(crate) fn ingest_reader(
    ingestor: &FileIngestor,
    name: &str,
    reader: impl Read,
    max_file_size: u64,
) -> Result<Candidate, ValidationResult> {
    let mut bytes = Vec::new();
    reader
        .take(max_file_size.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(|e| {
            rejected(
                name,
                DomainError::Unreadable {
                    name: name.to_string(),
                    reason: e.to_string(),
                },
            )
        })?;

    let declared = Some(guess_mime_type(name).to_string());
    Ok(ingestor.from_bytes(name, bytes, declared))
}

fn rejected(name: &str, error: DomainError) -> ValidationResult {
    ValidationResult::new(
        vec![error.to_string()],
        vec![],
        FileMetadata::new(name, 0, None, None),
    )
}
