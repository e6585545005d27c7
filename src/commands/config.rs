use crate::commands::result::{CommandResult, ConfigAction, ConfigResult};
use crate::config::UserConfig;
use anyhow::{Context, Result};
use std::path::Path;

/// configコマンドを実行する
///
/// # 引数
/// * `action` - show / set / reset
///
/// # エラー
/// 不正な値の `set` は ConfigError として返り、設定ファイルは変更されない。
pub fn execute(action: ConfigAction) -> Result<CommandResult> {
    let path = UserConfig::config_path().context("Failed to locate user configuration")?;
    execute_at(&path, action)
}

fn execute_at(path: &Path, action: ConfigAction) -> Result<CommandResult> {
    let config = match &action {
        ConfigAction::Show => UserConfig::load_from(path)
            .context("Failed to load user configuration. Please check your config.toml file.")?,
        ConfigAction::Set { key, value } => {
            let mut config = UserConfig::load_from(path).context(
                "Failed to load user configuration. Please check your config.toml file.",
            )?;
            config
                .set(key, value)
                .with_context(|| format!("Failed to set '{}'", key))?;
            config.save_to(path).context("Failed to save user configuration")?;
            tracing::info!(key = %key, value = %value, "configuration updated");
            config
        }
        ConfigAction::Reset => {
            UserConfig::reset_at(path).context("Failed to reset user configuration")?
        }
    };

    let settings = config
        .effective_settings()
        .context("Invalid upload settings")?;

    Ok(CommandResult::Config(ConfigResult {
        action,
        path: path.display().to_string(),
        endpoint: config.endpoint().to_string(),
        settings,
    }))
}
