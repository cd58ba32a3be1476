use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use sdep::config;

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct InitArgs {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitOutput {
    pub command: &'static str,
    pub path: PathBuf,
    pub next_steps: Vec<String>,
}

pub async fn run(_args: InitArgs, global: &GlobalArgs) -> CmdResult<InitOutput> {
    let path = config::init(&global.config)?;

    Ok((
        InitOutput {
            command: "init",
            path: path.clone(),
            next_steps: vec![
                format!("Edit {} with your servers and app path", path.display()),
                "Run `sdep setup` to prepare the servers".to_string(),
                "Run `sdep deploy` to ship the app".to_string(),
            ],
        },
        0,
    ))
}
