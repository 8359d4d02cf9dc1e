use deck_core::Cluster;

use super::Context;

pub fn add(
    ctx: &Context,
    reference: &str,
    name: Option<&str>,
    dns_base_domain: Option<&str>,
    dns_consensus_node_pattern: Option<&str>,
) -> anyhow::Result<()> {
    let manager = ctx.manager()?;
    let settings = manager.settings().clone();

    let mut cluster = Cluster::new(name.unwrap_or(reference), &settings.namespace, &settings.deployment);
    if let Some(domain) = dns_base_domain {
        cluster.dns_base_domain = domain.to_string();
    }
    if let Some(pattern) = dns_consensus_node_pattern {
        cluster.dns_consensus_node_pattern = pattern.to_string();
    }

    let invocation = ctx.invocation().with_flag("cluster", reference);
    manager.mutate(&invocation, |registry| {
        registry.add_cluster(reference, cluster);
        Ok(())
    })?;
    println!("✓ Cluster '{reference}' registered");
    Ok(())
}
