pub mod cluster_sim;
pub mod fault_injection;
pub mod tcp_node;

pub use cluster_sim::{SimSession, SimStats, SimulatedCluster};
pub use fault_injection::Fault;
pub use tcp_node::{SimNodeHandler, TcpCluster};
