//! Plain-text output for the operator.

use std::fmt::Write;
use std::time::Duration;

use replset_controller::{
    BootstrapOutcome, BootstrapReport, ClusterStatus, LocatedPrimary, ProbeResult,
    ProvisionOutcome, ReconcilePlan, ReconcileReport,
};
use replset_core::ReplSetStatus;

const RULE_WIDTH: usize = 50;

fn rule() -> String {
    "-".repeat(RULE_WIDTH)
}

pub fn probes(results: &[ProbeResult]) -> String {
    let mut out = String::new();
    for result in results {
        let _ = write!(
            out,
            "{:<24} {:<12} {:>6}ms",
            result.address,
            result.verdict().to_string(),
            result.elapsed.as_millis()
        );
        if let Some(error) = &result.error {
            let _ = write!(out, "  ({})", error);
        }
        out.push('\n');
    }
    out
}

pub fn replica_status(status: &ReplSetStatus) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "ReplicaSet Name: {}", status.set);
    let _ = writeln!(out, "{}", rule());
    for member in &status.members {
        let _ = writeln!(out, "Host: {}", member.name);
        let _ = writeln!(out, "State: {}", member.state);
        let _ = writeln!(out, "Health: {}", member.health);
        let _ = writeln!(out, "{}", rule());
    }
    out
}

pub fn cluster_status(report: &ClusterStatus) -> String {
    let mut out = probes(&report.probes);
    let _ = writeln!(out, "status read from {}", report.source);
    out.push_str(&replica_status(&report.status));
    out
}

pub fn primary(located: &LocatedPrimary) -> String {
    format!(
        "primary: {} (candidate #{}, {}ms)\n",
        located.address(),
        located.index,
        located.probe.elapsed.as_millis()
    )
}

pub fn plan(plan: &ReconcilePlan) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "set {} at version {} (primary {})",
        plan.current.set_name,
        plan.current.version,
        plan.primary.address()
    );
    for change in &plan.diff.changed {
        let _ = writeln!(out, "  ~ member {}: {} -> {}", change.id, change.from, change.to);
    }
    for added in &plan.diff.added {
        let _ = writeln!(out, "  + member {}: {}", added.id, added.host);
    }
    for id in &plan.diff.removed {
        let _ = writeln!(out, "  - member {}", id);
    }
    match &plan.proposed {
        Some(next) => {
            let _ = writeln!(out, "would submit version {}", next.version);
        }
        None => {
            let _ = writeln!(out, "no changes");
        }
    }
    out
}

pub fn reconcile(report: &ReconcileReport, budget: Duration) -> String {
    let mut out = String::new();
    if !report.changed {
        let _ = writeln!(
            out,
            "set {} already matches (version {}, primary {})",
            report.set_name, report.version, report.primary
        );
        return out;
    }

    let members: Vec<String> = report.changed_members.iter().map(|id| id.to_string()).collect();
    let _ = writeln!(
        out,
        "set {} reconfigured {} -> {} via {} (members {})",
        report.set_name,
        report.previous_version,
        report.version,
        report.primary,
        members.join(", ")
    );
    if report.stabilized {
        let _ = writeln!(
            out,
            "stabilized after {} poll(s)",
            report.poll_attempts
        );
    } else {
        let _ = writeln!(
            out,
            "not stabilized after {} poll(s) within {}ms",
            report.poll_attempts,
            budget.as_millis()
        );
    }
    if let Some(status) = &report.final_status {
        out.push_str(&replica_status(status));
    }
    out
}

pub fn bootstrap(report: &BootstrapReport) -> String {
    match report.outcome {
        BootstrapOutcome::Initiated => format!(
            "initiated {} with {} member(s) via {}\n",
            report.set_name, report.members, report.seed
        ),
        BootstrapOutcome::AlreadyInitialized => {
            format!("{} is already initialized, nothing to do\n", report.seed)
        }
    }
}

pub fn provision(outcome: ProvisionOutcome, database: &str, username: &str) -> String {
    match outcome {
        ProvisionOutcome::Created => format!("user {} created on {}\n", username, database),
        ProvisionOutcome::AlreadyExists => {
            format!("user {} already exists on {}\n", username, database)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replset_core::{Health, MemberId, MemberState, MemberStatus};

    fn status() -> ReplSetStatus {
        ReplSetStatus {
            set: "rs0".to_string(),
            members: vec![
                MemberStatus {
                    id: MemberId::new(0),
                    name: "mongo-0:27030".to_string(),
                    state: MemberState::Primary,
                    health: Health::Up,
                },
                MemberStatus {
                    id: MemberId::new(1),
                    name: "mongo-1:27031".to_string(),
                    state: MemberState::Recovering,
                    health: Health::Up,
                },
            ],
        }
    }

    #[test]
    fn test_replica_status_layout() {
        let text = replica_status(&status());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ReplicaSet Name: rs0");
        assert_eq!(lines[1], rule());
        assert_eq!(lines[2], "Host: mongo-0:27030");
        assert_eq!(lines[3], format!("State: {}", MemberState::Primary));
        assert_eq!(lines.len(), 2 + 2 * 4);
    }

    #[test]
    fn test_bootstrap_outcomes() {
        let mut report = BootstrapReport {
            seed: "mongo-0:27030".to_string(),
            set_name: "rs0".to_string(),
            members: 3,
            outcome: BootstrapOutcome::Initiated,
        };
        assert!(bootstrap(&report).contains("3 member(s)"));
        report.outcome = BootstrapOutcome::AlreadyInitialized;
        assert!(bootstrap(&report).contains("already initialized"));
    }
}
