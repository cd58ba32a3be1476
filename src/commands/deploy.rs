use clap::Args;

use sdep::{log_status, OperationReport};

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct DeployArgs {}

pub async fn run(_args: DeployArgs, global: &GlobalArgs) -> CmdResult<OperationReport> {
    let orchestrator = super::load_orchestrator(global)?;
    let report = orchestrator.deploy().await?;

    for host in report.failed_hosts() {
        log_status!("deploy", "{} failed", host);
    }

    let exit_code = report.exit_code();
    Ok((report, exit_code))
}
