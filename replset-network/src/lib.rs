pub mod endpoint;
pub mod tcp;

pub use endpoint::{AdminEndpoint, AdminHandler};
pub use tcp::{
    AdminRequest, AdminResponse, TcpAdminConfig, TcpAdminConnector, TcpAdminSession, WireResult,
};
