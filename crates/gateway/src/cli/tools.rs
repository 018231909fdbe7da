//! One-shot `tools` and `call` commands.

use std::time::Duration;

use anyhow::Context;
use serde_json::Value;

use tw_domain::config::Config;

use crate::bootstrap::connect_mcp;

/// Connect, print the discovered tools, close.
pub async fn list(config: &Config, as_json: bool) -> anyhow::Result<()> {
    let client = connect_mcp(config).await?;
    let tools = client.tools();

    if as_json {
        let descriptors: Vec<_> = tools.iter().map(|t| t.as_ref()).collect();
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
    } else if tools.is_empty() {
        println!("(no tools)");
    } else {
        let width = tools.iter().map(|t| t.name.len()).max().unwrap_or(0);
        for tool in tools.iter() {
            println!("{:width$}  {}", tool.name, tool.description);
        }
    }

    client.close().await;
    Ok(())
}

/// Connect, invoke `tool` once, print the result, close.
///
/// Returns whether the tool reported success.
pub async fn call(
    config: &Config,
    tool: &str,
    args: &str,
    timeout: Option<u64>,
    as_json: bool,
) -> anyhow::Result<bool> {
    let arguments: Value = serde_json::from_str(args).context("--args must be valid JSON")?;

    let client = connect_mcp(config).await?;
    let outcome = client
        .call_tool(tool, arguments, timeout.map(Duration::from_secs))
        .await;
    client.close().await;

    let result = outcome.with_context(|| format!("calling tool `{tool}`"))?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.text());
    }
    Ok(!result.is_error)
}
