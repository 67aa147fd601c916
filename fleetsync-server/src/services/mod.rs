pub mod agent_installer;
pub mod host_status;
