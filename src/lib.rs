//! Idempotent provisioning for Ubuntu web hosts.
//!
//! Every entry point builds a [`step::Playbook`] from the host's current state and hands it to
//! the sequential [`runner::Runner`]. Steps probe first and change the host only when the probe
//! says something is missing.

pub mod color;
pub mod config;
pub mod credentials;
pub mod download;
pub mod errors;
pub mod lock;
pub mod logging;
pub mod playbooks;
pub mod probe;
pub mod runner;
pub mod sentinel;
pub mod site;
pub mod step;
pub mod steps;
pub mod sysinfo;
pub mod template;
pub mod util;

pub use color::{
    color_enabled_stderr, log_error_stderr, log_info_stderr,
    log_ok_stderr, log_warn_stderr, paint, set_color_mode, ColorMode, Tone,
};
pub use config::Settings;
pub use errors::{display_error_chain, exit_code_for_error, exit_code_for_io_error, ProvisionError};
pub use lock::{acquire_lock_at, should_acquire_lock, HostLock};
pub use runner::{Outcome, Progress, Report, Runner, Silent};
pub use site::{domain_from_cwd, normalize_domain, Flavor, Site};
pub use step::{Context, Handler, OnFailure, Playbook, State, Step};
