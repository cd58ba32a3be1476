use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::GlobalArgs;

#[derive(Debug, Clone, Copy)]
enum ResponseMode {
    Json,
    /// Remote output streams straight to the terminal.
    Passthrough,
}

mod commands;
mod output;

use commands::{deploy, init, logs, reconfig, service, setup};
use sdep::config::DEFAULT_CONFIG_FILE;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "sdep")]
#[command(version = VERSION)]
#[command(about = "Build once, then set up, deploy and manage an app across a fleet of servers")]
struct Cli {
    /// Deployment config file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter config file
    Init(init::InitArgs),
    /// Prepare every server (directories, runtime, service job)
    Setup(setup::SetupArgs),
    /// Bundle the app and roll it out host by host
    Deploy(deploy::DeployArgs),
    /// Push env changes and restart, host by host
    Reconfig(reconfig::ReconfigArgs),
    /// Restart the app on every server
    Restart(service::ServiceArgs),
    /// Stop the app on every server
    Stop(service::ServiceArgs),
    /// Start the app on every server
    Start(service::ServiceArgs),
    /// Tail the app log on every server
    Logs(logs::LogsArgs),
}

fn response_mode(command: &Commands) -> ResponseMode {
    match command {
        Commands::Logs(_) => ResponseMode::Passthrough,
        _ => ResponseMode::Json,
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let global = GlobalArgs {
        config: cli.config.clone(),
    };
    let mode = response_mode(&cli.command);

    let (json_result, exit_code) = commands::run_json(cli.command, &global).await;

    match mode {
        ResponseMode::Json => {
            let _ = output::print_json_result(json_result);
        }
        ResponseMode::Passthrough => {
            if let Err(err) = json_result {
                let _ = output::print_json_result(Err(err));
            }
        }
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
