use clap::Args;

use sdep::OperationReport;

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct ReconfigArgs {}

pub async fn run(_args: ReconfigArgs, global: &GlobalArgs) -> CmdResult<OperationReport> {
    let orchestrator = super::load_orchestrator(global)?;
    let report = orchestrator.reconfig().await;
    let exit_code = report.exit_code();
    Ok((report, exit_code))
}
