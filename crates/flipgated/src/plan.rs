//! `flipgated plan`: the static part of a topology, before provisioning.

use std::fmt::Write;

use ipnet::Ipv4Net;

use flipgate_core::{DeploymentContext, FlipgateConfig};
use flipgate_network::subnet::ZONE_COUNT;
use flipgate_network::{SecurityPolicyGraph, SubnetPlanner};
use flipgate_topology::TopologySummary;

pub fn summarize(cfg: &FlipgateConfig) -> anyhow::Result<TopologySummary> {
    let ctx = DeploymentContext::from_config(&cfg.deployment);
    let space: Ipv4Net = cfg.cidr().parse()?;
    let plan = SubnetPlanner::plan(space, ZONE_COUNT, &ctx)?;
    let security = SecurityPolicyGraph::standard(&ctx)?;
    Ok(TopologySummary::planned(&ctx, &plan, &security))
}

/// Subnet and security edge tables, or the same data as JSON.
pub fn render(cfg: &FlipgateConfig, json: bool) -> anyhow::Result<String> {
    let summary = summarize(cfg)?;
    if json {
        return Ok(serde_json::to_string_pretty(&summary)? + "\n");
    }

    let mut out = String::new();
    writeln!(
        out,
        "stage {}  region {}  address space {}",
        summary.stage, summary.region, summary.address_space
    )?;

    writeln!(out)?;
    writeln!(out, "{:<34} {:<11} {:<16} {:<15} PUBLIC", "SUBNET", "ROLE", "ZONE", "CIDR")?;
    for s in &summary.subnets {
        writeln!(
            out,
            "{:<34} {:<11} {:<16} {:<15} {}",
            s.name,
            s.role,
            s.zone,
            s.cidr,
            if s.public { "yes" } else { "no" }
        )?;
    }

    writeln!(out)?;
    writeln!(out, "{:<18} {:<18} PORT", "FROM", "TO")?;
    for e in &summary.security_edges {
        writeln!(out, "{:<18} {:<18} {}", e.from, e.to, e.port)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_cover_every_subnet_and_edge() {
        let cfg = FlipgateConfig::scaffold("Dev");
        let text = render(&cfg, false).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert!(lines[0].contains("address space 10.0.0.0/16"));
        // header + blank + subnet header + 10 subnets + blank + edge header + 12 edges
        assert_eq!(lines.len(), 1 + 1 + 1 + 10 + 1 + 1 + 12);
        assert!(text.contains("0.0.0.0/0"));
        assert!(text.contains("3306"));
    }

    #[test]
    fn json_matches_summary() {
        let cfg = FlipgateConfig::scaffold("Dev");
        let value: serde_json::Value = serde_json::from_str(&render(&cfg, true).unwrap()).unwrap();
        assert_eq!(value["subnets"].as_array().unwrap().len(), 10);
        assert_eq!(value["security_edges"].as_array().unwrap().len(), 12);
        assert!(value.get("routers").is_none());
    }

    #[test]
    fn small_address_space_is_reported() {
        let mut cfg = FlipgateConfig::scaffold("Dev");
        cfg.network.as_mut().unwrap().cidr = Some("10.0.0.0/20".to_string());
        let err = render(&cfg, false).unwrap_err();
        assert!(err.to_string().contains("10.0.0.0/20"));
    }
}
