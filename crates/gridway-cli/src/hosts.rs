//! Host-list argument parsing.

use gridway_core::Host;

/// Parse `addr[:workers]` entries, comma-separated.
///
/// `"localhost:2,node1:4,node2"` → three hosts, the last with one
/// worker.
pub fn parse_hosts(arg: &str) -> anyhow::Result<Vec<Host>> {
    let mut hosts = Vec::new();
    for entry in arg.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let host = match entry.rsplit_once(':') {
            Some((address, workers)) => {
                let workers: u32 = workers
                    .parse()
                    .map_err(|_| anyhow::anyhow!("bad worker count in \"{entry}\""))?;
                if workers == 0 {
                    anyhow::bail!("host \"{address}\" has zero workers");
                }
                Host::new(address, workers)
            }
            None => Host::new(entry, 1),
        };
        hosts.push(host);
    }
    if hosts.is_empty() {
        anyhow::bail!("no hosts given");
    }
    Ok(hosts)
}
