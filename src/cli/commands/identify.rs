//! `identify` command

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;

use super::{print_json, CommandContext, Runnable};

/// Arguments for identify command
#[derive(Parser, Debug, Clone)]
pub struct IdentifyArgs {
    /// Also print what the session learned about the device
    #[arg(long)]
    pub info: bool,
}

impl IdentifyArgs {
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let wsman = ctx.wsman()?;
        let response = wsman.identify().await.context("Identify failed")?;

        if self.info {
            let info = wsman.connection().info();
            print_json(&json!({
                "identify": response.body,
                "session": info,
            }))?;
        } else {
            print_json(&response.body)?;
        }
        Ok(0)
    }
}

#[async_trait::async_trait]
impl Runnable for IdentifyArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}
