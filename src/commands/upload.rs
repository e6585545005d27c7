use crate::api::HttpTransport;
use crate::api::transport::UploadTransport;
use crate::api::types::reported_hash;
use crate::commands::result::{CommandResult, UploadResult};
use crate::commands::validate;
use crate::config::{UploadSettings, UserConfig};
use crate::domain::error::ValidationWarning;
use crate::domain::item::{ItemSnapshot, UploadStatus};
use crate::domain::metadata::FileIngestor;
use crate::domain::queue::QueueSnapshot;
use crate::domain::validator::{AcceptedFile, ValidationPipeline, ValidationResult};
use crate::presentation::progress;
use crate::scheduler::{SchedulerError, SchedulerHandle, SchedulerOptions};
use anyhow::{Context, Result};
use std::sync::Arc;

/// uploadコマンドのオプション
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// アップロード対象のファイルパス
    pub files: Vec<String>,
    /// 標準入力をこの名前のファイルとしてアップロードする
    pub stdin_name: Option<String>,
    /// 同時アップロード数（未指定なら設定値）
    pub concurrency: Option<usize>,
    /// 失敗したアイテムを再送する回数
    pub retries: u32,
    /// キューに入れる前にサーバー側の検証を実行する
    pub preflight: bool,
    /// 進捗を出力する
    pub show_progress: bool,
    /// 進捗をJSONで出力する
    pub machine_output: bool,
}

/// キューに入れるファイルと、入れなかったファイル
#[derive(Debug, Default)]
struct Admission {
    accepted: Vec<AcceptedFile>,
    rejected: Vec<ValidationResult>,
    warnings: Vec<String>,
}

/// uploadコマンドを実行する
///
/// 1. 各ファイルをローカルで検証（必要ならサーバーでも検証）
/// 2. 通過したファイルの内容ハッシュを計算してキューに投入
/// 3. すべてのアイテムが完了・失敗・キャンセルになるまで待つ
///
/// # エラー
/// このレイヤーでは anyhow::Result を返し、
/// 設定・インフラ・スケジューラのエラーを集約する。
/// 個々のファイルの検証失敗や転送失敗はエラーにせず結果に含める。
pub async fn execute(options: UploadOptions) -> Result<CommandResult> {
    let user_config = UserConfig::load()
        .context("Failed to load user configuration. Please check your config.toml file.")?;

    let settings = user_config
        .effective_settings()
        .context("Invalid upload settings")?;
    let pipeline = ValidationPipeline::new(settings);

    let transport = Arc::new(
        HttpTransport::new(user_config.endpoint()).context("Failed to create HTTP client")?,
    );
    tracing::debug!(endpoint = user_config.endpoint(), "using upload service");

    let ingestor = FileIngestor::new();
    let mut ingested: Vec<_> = options
        .files
        .iter()
        .map(|path| validate::ingest(&ingestor, path))
        .collect();
    if let Some(name) = &options.stdin_name {
        ingested.push(validate::ingest_reader(
            &ingestor,
            name,
            std::io::stdin().lock(),
            pipeline.settings().max_file_size(),
        ));
    }

    let mut admission = Admission::default();
    for entry in ingested {
        let candidate = match entry {
            Ok(candidate) => candidate,
            Err(result) => {
                admission.rejected.push(result);
                continue;
            }
        };

        let file = match pipeline.accept(candidate) {
            Ok(file) => file,
            Err(result) => {
                admission.rejected.push(result);
                continue;
            }
        };

        if options.preflight {
            match preflight(&transport, &file).await {
                Ok(warnings) => admission.warnings.extend(warnings),
                Err(result) => {
                    admission.rejected.push(result);
                    continue;
                }
            }
        }

        admission.accepted.push(file.with_content_hash());
    }

    let result = run_queue(transport, pipeline.settings(), admission, &options).await?;
    Ok(CommandResult::Upload(result))
}

/// サーバー側の検証を実行する
///
/// サーバーが弾いた場合はその結果を `Err` で返す。
/// サーバーに到達できない場合は弾かずに警告だけを返す（ローカル検証の結果で送る）。
async fn preflight(
    transport: &HttpTransport,
    file: &AcceptedFile,
) -> Result<Vec<String>, ValidationResult> {
    let name = file.metadata().name();
    match transport.preflight(file.source(), file.metadata()).await {
        Ok(remote) if remote.is_valid() => Ok(remote.warnings().to_vec()),
        Ok(remote) => Err(remote),
        Err(error) => {
            tracing::warn!(file = name, %error, "pre-flight validation unavailable");
            Ok(vec![
                ValidationWarning::PreflightUnavailable {
                    name: name.to_string(),
                    reason: error.to_string(),
                }
                .to_string(),
            ])
        }
    }
}

/// 検証済みファイルをスケジューラで転送し、最終状態を返す
async fn run_queue(
    transport: Arc<dyn UploadTransport>,
    settings: &UploadSettings,
    admission: Admission,
    options: &UploadOptions,
) -> Result<UploadResult> {
    let Admission {
        accepted,
        rejected,
        mut warnings,
    } = admission;
    warnings.extend(
        accepted
            .iter()
            .flat_map(|file| file.warnings().iter().cloned()),
    );

    if accepted.is_empty() {
        return Ok(UploadResult {
            rejected,
            warnings,
            items: vec![],
            total_progress: 0.0,
            errors: vec![],
            interrupted: false,
        });
    }

    let handle = SchedulerHandle::spawn(transport, SchedulerOptions::from_settings(settings))
        .context("Failed to start upload scheduler")?;
    if let Some(limit) = options.concurrency {
        handle
            .set_max_concurrent_uploads(limit)
            .await
            .context("Invalid --concurrency value")?;
    }

    let reporter = options
        .show_progress
        .then(|| progress::spawn_reporter(handle.subscribe(), options.machine_output));

    for file in accepted {
        handle
            .enqueue(file)
            .await
            .context("Failed to queue file for upload")?;
    }

    let (snapshot, interrupted) = tokio::select! {
        snapshot = settle_with_retries(&handle, options.retries) => (snapshot?, false),
        _ = tokio::signal::ctrl_c() => (interrupt(&handle).await?, true),
    };

    handle.shutdown();
    drop(handle);
    if let Some(reporter) = reporter {
        // 送信側が閉じるとタスクは終わる
        let _ = reporter.await;
    }

    warnings.extend(verify_hashes(&snapshot.items));

    Ok(UploadResult {
        rejected,
        warnings,
        items: snapshot.items,
        total_progress: snapshot.total_progress,
        errors: snapshot.errors,
        interrupted,
    })
}

/// Ctrl-C: 残りをすべてキャンセルし、中断の確認を待つ
///
/// 確認を待っている間にもう一度 Ctrl-C が押されたら、実行中の転送を放棄する。
async fn interrupt(handle: &SchedulerHandle) -> Result<QueueSnapshot, SchedulerError> {
    let aborting = handle.cancel_all().await?;
    tracing::warn!(
        aborting,
        "interrupted; cancelling remaining uploads (press Ctrl-C again to abandon them)"
    );

    tokio::select! {
        snapshot = handle.wait_until_settled() => snapshot,
        _ = tokio::signal::ctrl_c() => {
            let snapshot = handle.snapshot().await?;
            let removed = handle.reset().await?;
            tracing::warn!(removed, "abandoned uploads still in flight");
            Ok(snapshot)
        }
    }
}

/// サーバーが記録したハッシュとローカルのハッシュを突き合わせる
///
/// どちらかが無い場合は比較しない。
fn verify_hashes(items: &[ItemSnapshot]) -> Vec<String> {
    items
        .iter()
        .filter(|item| item.status == UploadStatus::Completed)
        .filter_map(|item| {
            let local = item.metadata.sha256()?;
            let reported = item.response.as_ref().and_then(reported_hash)?;
            (!reported.eq_ignore_ascii_case(local)).then(|| {
                ValidationWarning::HashMismatch {
                    name: item.metadata.name().to_string(),
                    reported: reported.to_string(),
                    local: local.to_string(),
                }
                .to_string()
            })
        })
        .collect()
}

/// キューが落ち着くまで待ち、failed のアイテムを最大 `retries` 回まで再送する
async fn settle_with_retries(
    handle: &SchedulerHandle,
    retries: u32,
) -> Result<QueueSnapshot, SchedulerError> {
    let mut snapshot = handle.wait_until_settled().await?;

    for attempt in 1..=retries {
        let failed: Vec<_> = snapshot
            .items
            .iter()
            .filter(|item| item.status == UploadStatus::Failed)
            .map(|item| item.id)
            .collect();
        if failed.is_empty() {
            break;
        }

        tracing::info!(attempt, count = failed.len(), "retrying failed uploads");
        for id in failed {
            handle.retry(id).await?;
        }
        snapshot = handle.wait_until_settled().await?;
    }

    Ok(snapshot)
}
