//! The four entry-point playbooks. Each builder only reads the host; nothing runs until the
//! playbook is handed to the runner.

pub mod add_domain;
pub mod install_project;
pub mod postinstall;
pub mod preinstall;

pub use add_domain::AddDomain;
