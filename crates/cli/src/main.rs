//! `comfyflow` -- drive a ComfyUI instance from the command line.
//!
//! Results are printed to stdout as pretty JSON. Failures print the
//! error's JSON rendering (`error`, `code`, `details`, `suggestion`) to
//! stdout and exit with status 1. Logs go to stderr.
//!
//! # Environment variables
//!
//! | Variable                   | Required | Default                 | Description                          |
//! |----------------------------|----------|-------------------------|--------------------------------------|
//! | `COMFY_URL`                | no       | `http://localhost:8188` | Engine base URL                      |
//! | `COMFY_URL_EXTERNAL`       | no       | --                      | Base URL used in returned links      |
//! | `COMFY_WORKFLOWS_DIR`      | no       | --                      | Directory of saved workflows         |
//! | `COMFY_WORKFLOW_JSON_FILE` | no       | --                      | Workflow used by `generate`          |
//! | `PROMPT_NODE_ID`           | no       | --                      | Node receiving the `generate` prompt |
//! | `OUTPUT_NODE_ID`           | no       | --                      | Default output node                  |
//! | `OUTPUT_MODE`              | no       | `file`                  | `file` or `url`                      |
//! | `POLL_TIMEOUT`             | no       | `60`                    | Seconds to wait for a prompt         |
//! | `POLL_INTERVAL`            | no       | `1.0`                   | Seconds between status checks        |
//! | `RUST_LOG`                 | no       | `comfyflow=info,...`    | Log filter                           |

use std::process::ExitCode;

use clap::Parser;
use comfyflow_cli::cli::Cli;
use comfyflow_cli::commands;
use comfyflow_comfyui::{ComfyConfig, ComfyError, ComfyResult, ComfyUIManager};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comfyflow=info,comfyflow_cli=info,comfyflow_comfyui=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(value) => {
            print_json(&value)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            tracing::debug!(code = err.code(), error = %err, "Command failed");
            print_json(&err.to_json())?;
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run(cli: Cli) -> ComfyResult<Value> {
    let mut config = ComfyConfig::from_env().map_err(ComfyError::Config)?;
    cli.apply_overrides(&mut config);

    tracing::debug!(
        url = %config.base_url,
        output_mode = ?config.output_mode,
        "Starting comfyflow",
    );

    let manager = ComfyUIManager::from_config(config);
    commands::execute(&manager, cli.command).await
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
