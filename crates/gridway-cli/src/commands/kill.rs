use std::sync::Arc;

use gridway_core::RunConfig;
use gridway_lifecycle::LifecycleManager;
use gridway_remote::RemoteClient;

use crate::hosts::parse_hosts;

pub async fn kill(config: RunConfig, hosts_arg: &str, force: bool) -> anyhow::Result<()> {
    let hosts = parse_hosts(hosts_arg)?;
    let client = Arc::new(RemoteClient::new(&config.ssh_user, config.ssh_key.clone()));
    let lifecycle = LifecycleManager::new(client, config);

    for host in &hosts {
        lifecycle.kill(&host.address, 0, force).await?;
        println!("✓ {}: leased processes signalled", host.address);
    }
    Ok(())
}
