mod api;
mod cli;
mod commands;
mod config;
mod domain;
mod error_severity;
mod presentation;
mod scheduler;

use anyhow::Result;
use api::error::InfraError;
use config::APP_CONFIG;
use config::error::ConfigError;
use domain::error::DomainError;
use error_severity::ErrorSeverity;
use scheduler::SchedulerError;
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    init_logging();

    let args: Vec<String> = env::args().collect();
    let machine_output = cli::is_machine_output(&args);

    match run(&args).await {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => handle_error(e, machine_output),
    }
}

/// アプリケーションのメイン処理
async fn run(args: &[String]) -> Result<i32> {
    cli::parse_args(args).await
}

/// ログ出力の初期化
///
/// ログは常にstderrへ出す（stdoutは --machine のJSON用）。
/// RUST_LOG が未設定ならビルド時設定のレベルを使う。
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&APP_CONFIG.logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// エラーハンドリングとユーザーへの表示
///
/// anyhow::Error から元のエラー型を downcast して、
/// エラーの種類に応じた exit code とメッセージを決定する。
fn handle_error(error: anyhow::Error, machine_output: bool) {
    let severity = determine_severity(&error);
    let hint = get_error_hint(&error);

    tracing::debug!(error = ?error, "command failed");
    presentation::output::output_error(&error, severity, hint.as_deref(), machine_output);

    std::process::exit(severity.exit_code());
}

/// エラーチェーンから重大度を決定
fn determine_severity(error: &anyhow::Error) -> ErrorSeverity {
    for cause in error.chain() {
        if let Some(domain_err) = cause.downcast_ref::<DomainError>() {
            return domain_err.severity();
        }

        if let Some(infra_err) = cause.downcast_ref::<InfraError>() {
            return infra_err.severity();
        }

        if let Some(config_err) = cause.downcast_ref::<ConfigError>() {
            return config_err.severity();
        }

        if let Some(scheduler_err) = cause.downcast_ref::<SchedulerError>() {
            return scheduler_err.severity();
        }
    }

    // 不明なエラー（引数の誤りなど）
    ErrorSeverity::UserError
}

/// エラーに対するユーザー向けヒントを取得
fn get_error_hint(error: &anyhow::Error) -> Option<String> {
    for cause in error.chain() {
        let hint = if let Some(domain_err) = cause.downcast_ref::<DomainError>() {
            domain_err.hint()
        } else if let Some(infra_err) = cause.downcast_ref::<InfraError>() {
            infra_err.hint()
        } else if let Some(config_err) = cause.downcast_ref::<ConfigError>() {
            config_err.hint()
        } else if let Some(scheduler_err) = cause.downcast_ref::<SchedulerError>() {
            scheduler_err.hint()
        } else {
            None
        };

        if let Some(hint) = hint {
            return Some(hint.to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_severity_from_wrapped_config_error() {
        let result: Result<()> = Err(ConfigError::validation_error("bad limit"))
            .context("Config command failed");
        let error = result.unwrap_err();

        assert_eq!(determine_severity(&error), ErrorSeverity::ConfigError);
        assert!(get_error_hint(&error).is_some());
    }

    #[test]
    fn test_severity_from_infra_error() {
        let error = anyhow::Error::from(InfraError::network("connection refused"))
            .context("Upload command failed");
        assert_eq!(determine_severity(&error), ErrorSeverity::SystemError);
    }

    #[test]
    fn test_unknown_error_is_user_error() {
        let error = anyhow::anyhow!("Unknown command: 'launch'");
        assert_eq!(determine_severity(&error), ErrorSeverity::UserError);
        assert!(get_error_hint(&error).is_none());
    }
}
