use std::path::PathBuf;

use gridway_core::RunConfig;
use gridway_orchestrator::OrchestratorSession;

use crate::backend::ProcessBackend;
use crate::hosts::parse_hosts;

pub async fn sweep(
    mut config: RunConfig,
    target: &str,
    hosts_arg: &str,
    from: u32,
    to: u32,
    report: Option<PathBuf>,
) -> anyhow::Result<()> {
    if let Some(path) = report {
        config.report_file = path;
    }
    let report_file = config.report_file.clone();
    let hosts = parse_hosts(hosts_arg)?;

    let mut session = OrchestratorSession::new(config, hosts)?;
    let report = session.sweep::<ProcessBackend>(target, from, to, &[]).await?;

    println!("✓ swept {} modes → {}", report.entries.len(), report_file.display());
    for entry in &report.entries {
        match (entry.rank, &entry.human, &entry.error) {
            (Some(rank), Some(human), _) => {
                let delta = entry.delta_secs.unwrap_or(0.0);
                if delta == 0.0 {
                    println!("  #{rank} {} — {human}", entry.label);
                } else {
                    println!("  #{rank} {} — {human} (+{delta:.1}s)", entry.label);
                }
            }
            (_, _, Some(error)) => println!("  ✗ {} — {error}", entry.label),
            _ => {}
        }
    }
    Ok(())
}
