//! `get` command - fetch one instance

use anyhow::{anyhow, Context, Result};
use clap::Parser;

use super::{print_json, CommandContext, Runnable};

/// Arguments for get command
#[derive(Parser, Debug, Clone)]
pub struct GetArgs {
    /// Class name (e.g. AMT_GeneralSettings) or full resource URI
    #[arg(required = true)]
    pub class: String,

    /// Selector as key=value; may be repeated
    #[arg(long = "selector", short = 's', action = clap::ArgAction::Append)]
    pub selectors: Vec<String>,
}

/// Split `key=value` selector arguments.
pub fn parse_selectors(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|s| {
            s.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| anyhow!("invalid selector '{}', expected key=value", s))
        })
        .collect()
}

impl GetArgs {
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let selectors = parse_selectors(&self.selectors)?;
        let borrowed: Vec<(&str, &str)> = selectors
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let wsman = ctx.wsman()?;
        let response = wsman
            .get(&self.class, &borrowed)
            .await
            .with_context(|| format!("Get {} failed", self.class))?;
        print_json(&response.body)?;
        Ok(0)
    }
}

#[async_trait::async_trait]
impl Runnable for GetArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}
