use gridway_core::{ExecutionMode, RunConfig};
use gridway_orchestrator::{OrchestratorSession, format_duration};

use crate::backend::ProcessBackend;
use crate::hosts::parse_hosts;

pub async fn run(
    config: RunConfig,
    target: &str,
    mode_str: &str,
    hosts_arg: &str,
    extra: Vec<String>,
    verbosity: u8,
) -> anyhow::Result<()> {
    let mode = ExecutionMode::parse(mode_str)?;
    let hosts = parse_hosts(hosts_arg)?;

    let mut session = OrchestratorSession::new(config, hosts)?.with_verbosity(verbosity);
    let result = session.run::<ProcessBackend>(target, mode, &extra).await?;

    println!(
        "✓ {} finished in {}",
        result.mode_label,
        format_duration(result.elapsed_secs)
    );
    let mut runtimes: Vec<_> = result.worker_runtimes.iter().collect();
    runtimes.sort_by(|a, b| a.0.cmp(b.0));
    for (host, secs) in runtimes {
        println!("  {host}: {}", format_duration(*secs));
    }
    Ok(())
}
