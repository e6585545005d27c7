use crate::commands::{self, CommandResult};
use crate::commands::result::ConfigAction;
use crate::commands::upload::UploadOptions;
use crate::presentation::output;
use anyhow::{Context, Result, bail};

/// CLI引数を解析し、適切なコマンドにディスパッチする
///
/// # 戻り値
/// コマンド結果から決まる終了コード（0 = 成功）
pub async fn parse_args(args: &[String]) -> Result<i32> {
    let machine_output = is_machine_output(args);
    let args = strip_global_flags(args);

    if args.len() < 2 {
        output::print_usage();
        return Ok(0);
    }

    let command = args[1].as_str();
    let rest = &args[2..];

    let result = match command {
        "validate" => {
            let (files, stdin_name) = parse_validate_args(rest)?;
            commands::validate::execute(&files, stdin_name.as_deref())
                .context("Validate command failed")?
        }
        "upload" => {
            let mut options = parse_upload_args(rest)?;
            options.machine_output = machine_output;
            commands::upload::execute(options)
                .await
                .context("Upload command failed")?
        }
        "config" => {
            let action = parse_config_args(rest)?;
            commands::config::execute(action).context("Config command failed")?
        }
        "help" | "--help" | "-h" => CommandResult::Help,
        _ => bail!(
            "Unknown command: '{}'. Use 'help' to see available commands.",
            command
        ),
    };

    output::output_result(&result, machine_output)?;
    Ok(result.exit_code())
}

/// `--machine` フラグが指定されているか
pub fn is_machine_output(args: &[String]) -> bool {
    args.iter().any(|arg| arg == "--machine")
}

fn strip_global_flags(args: &[String]) -> Vec<String> {
    args.iter()
        .filter(|arg| arg.as_str() != "--machine")
        .cloned()
        .collect()
}

/// `--stdin <name>` の値を取り出す
fn stdin_name(iter: &mut std::slice::Iter<'_, String>) -> Result<String> {
    iter.next()
        .cloned()
        .context("--stdin requires a file name, e.g. --stdin part.stl")
}

/// validateコマンドの引数を解析する
fn parse_validate_args(args: &[String]) -> Result<(Vec<String>, Option<String>)> {
    let mut files = Vec::new();
    let mut stdin = None;
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--stdin" => stdin = Some(stdin_name(&mut iter)?),
            flag if flag.starts_with("--") => {
                bail!("Unknown option for validate: '{}'", flag)
            }
            path => files.push(path.to_string()),
        }
    }

    if files.is_empty() && stdin.is_none() {
        bail!("Please specify at least one file for validate command");
    }

    Ok((files, stdin))
}

/// uploadコマンドの引数を解析する
fn parse_upload_args(args: &[String]) -> Result<UploadOptions> {
    let mut options = UploadOptions::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--concurrency" => {
                let value = iter
                    .next()
                    .context("--concurrency requires a number, e.g. --concurrency 3")?;
                let limit = value
                    .parse::<usize>()
                    .with_context(|| format!("Invalid --concurrency value: '{}'", value))?;
                if limit == 0 {
                    bail!("--concurrency must be at least 1");
                }
                options.concurrency = Some(limit);
            }
            "--retries" => {
                let value = iter
                    .next()
                    .context("--retries requires a number, e.g. --retries 2")?;
                options.retries = value
                    .parse::<u32>()
                    .with_context(|| format!("Invalid --retries value: '{}'", value))?;
            }
            "--stdin" => options.stdin_name = Some(stdin_name(&mut iter)?),
            "--progress" => options.show_progress = true,
            "--preflight" => options.preflight = true,
            flag if flag.starts_with("--") => {
                bail!("Unknown option for upload: '{}'", flag)
            }
            path => options.files.push(path.to_string()),
        }
    }

    if options.files.is_empty() && options.stdin_name.is_none() {
        bail!("Please specify at least one file for upload command");
    }

    Ok(options)
}

/// configコマンドの引数を解析する
fn parse_config_args(args: &[String]) -> Result<ConfigAction> {
    match args.first().map(String::as_str) {
        None | Some("show") => Ok(ConfigAction::Show),
        Some("set") => {
            let key = args
                .get(1)
                .context("Usage: config set <key> <value>")?;
            let value = args
                .get(2)
                .context("Usage: config set <key> <value>")?;
            Ok(ConfigAction::Set {
                key: key.clone(),
                value: value.clone(),
            })
        }
        Some("reset") => Ok(ConfigAction::Reset),
        Some(other) => bail!(
            "Unknown config action: '{}'. Expected show, set or reset.",
            other
        ),
    }
}
