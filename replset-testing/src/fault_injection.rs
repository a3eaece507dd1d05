use replset_core::{CommandFailure, MemberId, MemberState};
use std::time::Duration;

/// Faults a [`SimulatedCluster`](crate::SimulatedCluster) can be put into.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Node refuses connections and drops open sessions' commands
    NodeDown(MemberId),
    /// Undo `NodeDown`
    NodeUp(MemberId),
    /// Node rejects every login
    RejectCredentials(MemberId),
    /// Every connect and command on the node waits this long first
    Latency { node: MemberId, delay: Duration },
    /// Node reports this state in status output regardless of elections
    StickInState { node: MemberId, state: MemberState },
    /// After each accepted reconfiguration, non-primary members report
    /// RECOVERING for this many status polls
    SettleAfter { polls: u32 },
    /// Every reconfiguration is rejected with this failure
    RejectReconfig(CommandFailure),
}

impl Fault {
    pub fn describe(&self) -> String {
        match self {
            Fault::NodeDown(id) => format!("node {} down", id),
            Fault::NodeUp(id) => format!("node {} up", id),
            Fault::RejectCredentials(id) => format!("node {} rejects credentials", id),
            Fault::Latency { node, delay } => format!("node {} latency {:?}", node, delay),
            Fault::StickInState { node, state } => format!("node {} stuck in {}", node, state),
            Fault::SettleAfter { polls } => format!("settle after {} polls", polls),
            Fault::RejectReconfig(failure) => format!("reject reconfig: {}", failure),
        }
    }
}
