//! `enum` command - enumerate all instances of a class

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;

use super::{print_json, CommandContext, Runnable};

/// Arguments for enum command
#[derive(Parser, Debug, Clone)]
pub struct EnumerateArgs {
    /// Class name (e.g. CIM_Processor) or full resource URI
    #[arg(required = true)]
    pub class: String,
}

impl EnumerateArgs {
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let wsman = ctx.wsman()?;
        let items = wsman
            .enumerate_all(&self.class)
            .await
            .with_context(|| format!("Enumerate {} failed", self.class))?;
        print_json(&Value::Array(items))?;
        Ok(0)
    }
}

#[async_trait::async_trait]
impl Runnable for EnumerateArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}
