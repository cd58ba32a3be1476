use clap::Args;
use serde::Serialize;

use sdep::task::Operation;

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct LogsArgs {
    /// Options passed to the remote `tail` (e.g. `-f -n 100`)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub options: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsOutput {
    pub operation: Operation,
    pub hosts: usize,
    pub interrupted: bool,
}

/// Relay every host's log until the tails end or Ctrl-C.
pub async fn run(args: LogsArgs, global: &GlobalArgs) -> CmdResult<LogsOutput> {
    let orchestrator = super::load_orchestrator(global)?;
    let tail = orchestrator.logs(&args.options)?;
    let hosts = tail.len();

    let closer = tail.token();
    let relay = tail.wait();
    tokio::pin!(relay);

    let interrupted = tokio::select! {
        _ = &mut relay => false,
        Ok(()) = tokio::signal::ctrl_c() => true,
    };

    if interrupted {
        closer.cancel();
        relay.await;
    }

    Ok((
        LogsOutput {
            operation: Operation::Logs,
            hosts,
            interrupted,
        },
        0,
    ))
}
