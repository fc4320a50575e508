use std::sync::Arc;

use gridway_core::RunConfig;
use gridway_lifecycle::LifecycleManager;
use gridway_remote::RemoteClient;

use crate::hosts::parse_hosts;

pub async fn clean(config: RunConfig, hosts_arg: &str) -> anyhow::Result<()> {
    let mut hosts = parse_hosts(hosts_arg)?;
    let client = Arc::new(RemoteClient::new(&config.ssh_user, config.ssh_key.clone()));
    for host in &mut hosts {
        host.is_local = client.is_local(&host.address);
    }
    let lifecycle = LifecycleManager::new(client, config);

    let mut failed = false;
    for (host, result) in lifecycle.clean_all(&hosts).await {
        match result {
            Ok(()) => println!("✓ {host}: working directory purged"),
            Err(err) => {
                eprintln!("✗ {host}: {err}");
                failed = true;
            }
        }
    }
    if failed {
        anyhow::bail!("clean failed on at least one host");
    }
    Ok(())
}
