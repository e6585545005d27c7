/// プレゼンテーション層: コマンド結果の出力
///
/// コマンド実行結果をユーザー向け（人間可読）または
/// 機械向け（JSON）形式で出力する責務を担います。
/// CLI使用方法とエラーの表示もこのモジュールが担当します。
use crate::commands::result::{CommandResult, ConfigAction};
use crate::domain::item::UploadStatus;
use crate::domain::validator::{ValidationResult, format_mb};
use crate::error_severity::ErrorSeverity;
use anyhow::Result;

/// ヘルプテキスト（単一の情報源）
pub const HELP_TEXT: &str = "meshdrop
Validate and upload 3D model files (STL / OBJ / PLY) from the command line

Usage:
  meshdrop [--machine] <command> [args...]

Global Flags:
  --machine        - Output machine-readable JSON to stdout (for scripting)
                     Works for both success and error cases

Available commands:
  validate <file>... [--stdin NAME]
                   - Check files against the size, extension, MIME type
                     and header rules without uploading them
  upload <file>... [--stdin NAME] [--concurrency N] [--retries N] [--progress] [--preflight]
                   - Validate and upload files through the upload queue
                     --stdin NAME:    Also read a file named NAME from standard input
                     --concurrency N: Number of simultaneous uploads
                     --retries N:     Retry failed uploads up to N times
                     --progress:      Show upload progress
                     --preflight:     Ask the server to validate each file first
                                      (skipped with a warning if it is unreachable)
                   Ctrl-C cancels the remaining uploads; press it again to
                   abandon transfers that are still in flight
  config show      - Show the effective configuration
  config set <key> <value>
                   - Change a setting (endpoint, max_file_size,
                     max_concurrent_uploads, allowed_extensions,
                     allowed_mime_types, strict_mime_validation)
                     Lists are comma separated, e.g. .stl,.obj
  config reset     - Restore the default configuration
  help             - Display this help message

Exit Codes:
  0  success
  1  a file was rejected or cancelled
  2  configuration error
  3  network or server failure

Progress Output:
  upload --progress              - Show human-readable progress to stderr
  --machine upload --progress    - Output one JSON event per line to stdout

Logging:
  Set RUST_LOG (e.g. RUST_LOG=meshdrop=debug) to see diagnostic logs on stderr.";

/// コマンド使用方法を表示する
pub fn print_usage() {
    eprintln!("{}", HELP_TEXT);
}

/// コマンド結果を適切な形式で出力する
///
/// # Output
/// * `machine_output = false`: 人間向けの詳細メッセージ（stderr）
/// * `machine_output = true`: 機械可読JSON（stdout）
pub fn output_result(result: &CommandResult, machine_output: bool) -> Result<()> {
    if machine_output {
        output_machine_readable(result)?;
    } else {
        output_human_readable(result)?;
    }

    Ok(())
}

/// 人間向けの詳細メッセージを出力（stderr）
///
/// すべての出力はstderrに送られ、stdoutはパイプライン用に予約されます。
fn output_human_readable(result: &CommandResult) -> Result<()> {
    match result {
        CommandResult::Validate(r) => {
            eprintln!();
            for validation in &r.results {
                print_validation(validation);
            }
            eprintln!("---");
            eprintln!("{}", result.success_message());
        }
        CommandResult::Upload(r) => {
            eprintln!();
            for validation in &r.rejected {
                print_validation(validation);
            }
            for warning in &r.warnings {
                eprintln!("Warning: {}", warning);
            }

            if !r.items.is_empty() {
                eprintln!("Uploads:");
                for item in &r.items {
                    match item.status {
                        UploadStatus::Completed => {
                            let id = item
                                .response
                                .as_ref()
                                .and_then(crate::api::types::upload_id)
                                .unwrap_or("-");
                            eprintln!(
                                "  ✓ {} ({} MB) -> {}",
                                item.metadata.name(),
                                format_mb(item.metadata.size()),
                                id
                            );
                        }
                        UploadStatus::Failed => {
                            eprintln!(
                                "  ✗ {}: {}",
                                item.metadata.name(),
                                item.error.as_deref().unwrap_or("upload failed")
                            );
                        }
                        status => {
                            eprintln!("  - {} ({})", item.metadata.name(), status);
                        }
                    }
                }
            }

            eprintln!("---");
            eprintln!(
                "Completed: {}  Failed: {}  Cancelled: {}  Rejected: {}",
                r.count(UploadStatus::Completed),
                r.count(UploadStatus::Failed),
                r.count(UploadStatus::Cancelled),
                r.rejected.len()
            );
            eprintln!("Overall progress: {:.1}%", r.total_progress);
            eprintln!("{}", result.success_message());
        }
        CommandResult::Config(r) => {
            eprintln!();
            if r.action != ConfigAction::Show {
                eprintln!("{}", result.success_message());
                eprintln!();
            }
            eprintln!("Config file:            {}", r.path);
            eprintln!("Endpoint:               {}", r.endpoint);
            eprintln!(
                "Max file size:          {} bytes ({} MB)",
                r.settings.max_file_size(),
                format_mb(r.settings.max_file_size())
            );
            eprintln!("Max concurrent uploads: {}", r.settings.max_concurrent_uploads());
            eprintln!(
                "Allowed extensions:     {}",
                r.settings.allowed_extensions().join(", ")
            );
            eprintln!(
                "Allowed MIME types:     {}",
                r.settings.allowed_mime_types().join(", ")
            );
            eprintln!(
                "Strict MIME validation: {}",
                r.settings.strict_mime_validation()
            );
        }
        CommandResult::Help => {
            eprintln!("{}", HELP_TEXT);
        }
    }

    Ok(())
}

fn print_validation(validation: &ValidationResult) {
    let metadata = validation.metadata();
    if validation.is_valid() {
        eprintln!("✓ {} ({} MB)", metadata.name(), format_mb(metadata.size()));
    } else {
        eprintln!("✗ {}", metadata.name());
    }
    for error in validation.errors() {
        eprintln!("    error: {}", error);
    }
    for warning in validation.warnings() {
        eprintln!("    warning: {}", warning);
    }
}

/// 機械可読JSONを組み立てる
fn machine_json(result: &CommandResult) -> Result<serde_json::Value> {
    let mut json = serde_json::to_value(result)?;
    if let Some(object) = json.as_object_mut() {
        object.insert(
            "success".to_string(),
            serde_json::Value::Bool(result.exit_code() == 0),
        );
        object.insert(
            "exit_code".to_string(),
            serde_json::Value::from(result.exit_code()),
        );
    }
    Ok(json)
}

/// 機械可読JSONを出力（stdout）
fn output_machine_readable(result: &CommandResult) -> Result<()> {
    let json = machine_json(result)?;
    println!("{}", serde_json::to_string(&json)?);
    Ok(())
}

/// エラーを出力する
///
/// * `machine_output = false`: "Error:" と原因の連鎖、ヒントをstderrへ
/// * `machine_output = true`: エラーオブジェクトをstdoutへ
pub fn output_error(
    error: &anyhow::Error,
    severity: ErrorSeverity,
    hint: Option<&str>,
    machine_output: bool,
) {
    if machine_output {
        let causes: Vec<String> = error.chain().skip(1).map(|c| c.to_string()).collect();
        let json = serde_json::json!({
            "success": false,
            "error": {
                "message": error.to_string(),
                "causes": causes,
                "severity": severity,
                "exit_code": severity.exit_code(),
                "hint": hint,
            }
        });
        println!("{}", json);
        return;
    }

    eprintln!("Error: {}", error);

    let chain: Vec<_> = error.chain().skip(1).collect();
    if !chain.is_empty() {
        eprintln!("\nCaused by:");
        for (i, cause) in chain.iter().enumerate() {
            eprintln!("  {}: {}", i + 1, cause);
        }
    }

    if let Some(hint) = hint {
        eprintln!("\nHint: {}", hint);
    }
}
