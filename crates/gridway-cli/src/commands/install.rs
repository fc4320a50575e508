use gridway_core::{ExecutionMode, RunConfig};
use gridway_orchestrator::OrchestratorSession;

use crate::backend::ProcessBackend;
use crate::hosts::parse_hosts;

pub async fn install(
    config: RunConfig,
    hosts_arg: &str,
    upgrade: bool,
    accelerated: bool,
) -> anyhow::Result<()> {
    let mut code = String::new();
    if accelerated {
        code.push('g');
    }
    code.push(if upgrade { 'u' } else { 'i' });
    let mode = ExecutionMode::from_code(&code)?;

    let hosts = parse_hosts(hosts_arg)?;
    let count = hosts.len();

    let mut session = OrchestratorSession::new(config, hosts)?;
    // The install branch never reads the work manifest.
    session.run::<ProcessBackend>("-", mode, &[]).await?;

    println!(
        "✓ {} host{} provisioned ({})",
        count,
        if count == 1 { "" } else { "s" },
        mode.label()
    );
    Ok(())
}
