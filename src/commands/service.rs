//! `restart`, `stop` and `start`: one upstart verb on every host.

use clap::Args;

use sdep::OperationReport;

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct ServiceArgs {}

#[derive(Debug, Clone, Copy)]
pub enum Verb {
    Restart,
    Stop,
    Start,
}

pub async fn run(verb: Verb, _args: ServiceArgs, global: &GlobalArgs) -> CmdResult<OperationReport> {
    let orchestrator = super::load_orchestrator(global)?;

    let report = match verb {
        Verb::Restart => orchestrator.restart().await,
        Verb::Stop => orchestrator.stop().await,
        Verb::Start => orchestrator.start().await,
    };

    let exit_code = report.exit_code();
    Ok((report, exit_code))
}
