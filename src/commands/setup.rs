use clap::Args;

use sdep::OperationReport;

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct SetupArgs {}

pub async fn run(_args: SetupArgs, global: &GlobalArgs) -> CmdResult<OperationReport> {
    let orchestrator = super::load_orchestrator(global)?;
    let report = orchestrator.setup().await;
    let exit_code = report.exit_code();
    Ok((report, exit_code))
}
