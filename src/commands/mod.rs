use std::path::PathBuf;

use sdep::config;
use sdep::Orchestrator;

pub type CmdResult<T> = sdep::Result<(T, i32)>;

pub(crate) struct GlobalArgs {
    pub config: PathBuf,
}

/// Load the config named by `--config` and group its roster.
pub(crate) fn load_orchestrator(global: &GlobalArgs) -> sdep::Result<Orchestrator> {
    let config = config::load(&global.config)?;
    let cwd = std::env::current_dir().map_err(|e| {
        sdep::Error::internal_io(e.to_string(), Some("resolve working directory".to_string()))
    })?;

    Orchestrator::with_defaults(config, &cwd)
}

pub mod deploy;
pub mod init;
pub mod logs;
pub mod reconfig;
pub mod service;
pub mod setup;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global).await)
    };
}

pub(crate) async fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (sdep::Result<serde_json::Value>, i32) {
    match command {
        crate::Commands::Init(args) => dispatch!(args, global, init),
        crate::Commands::Setup(args) => dispatch!(args, global, setup),
        crate::Commands::Deploy(args) => dispatch!(args, global, deploy),
        crate::Commands::Reconfig(args) => dispatch!(args, global, reconfig),
        crate::Commands::Restart(args) => service_dispatch(service::Verb::Restart, args, global).await,
        crate::Commands::Stop(args) => service_dispatch(service::Verb::Stop, args, global).await,
        crate::Commands::Start(args) => service_dispatch(service::Verb::Start, args, global).await,
        crate::Commands::Logs(args) => dispatch!(args, global, logs),
    }
}

async fn service_dispatch(
    verb: service::Verb,
    args: service::ServiceArgs,
    global: &GlobalArgs,
) -> (sdep::Result<serde_json::Value>, i32) {
    crate::output::map_cmd_result_to_json(service::run(verb, args, global).await)
}
