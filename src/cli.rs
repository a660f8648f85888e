use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "vds-provisioner",
    version,
    about = "Provision an Ubuntu web host: nginx, PHP-FPM, MySQL, memcached, vhosts with Let's Encrypt, Laravel."
)]
pub(crate) struct Cli {
    /// YAML settings file (default: $VDS_CONFIG, then /etc/vds-provisioner/config.yaml)
    #[arg(long, global = true, value_name = "PATH")]
    pub(crate) config: Option<PathBuf>,

    /// Probe only: report what would change without touching the host
    #[arg(long, global = true)]
    pub(crate) dry_run: bool,

    /// Emit a machine-readable JSON report on stdout
    #[arg(long, global = true)]
    pub(crate) json: bool,

    /// Print every command before it runs and log at debug level
    #[arg(long, global = true)]
    pub(crate) verbose: bool,

    /// Suppress the banner and per-step progress lines
    #[arg(long, global = true)]
    pub(crate) quiet: bool,

    /// Colorize output: auto|always|never
    #[arg(long, global = true, value_enum)]
    pub(crate) color: Option<vds_provisioner::ColorMode>,

    /// Prefix for every managed file path (image preparation, tests)
    #[arg(long, global = true, value_name = "DIR", default_value = "/")]
    pub(crate) root: PathBuf,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum Command {
    /// Install the web stack, create the admin user and secure MySQL
    Preinstall,

    /// Tune nginx, PHP, MySQL and memcached to the host; install phpMyAdmin and ionCube
    Postinstall,

    /// Add a virtual host with its own PHP-FPM pool and a Let's Encrypt certificate
    AddDomain {
        /// Domain to serve; a leading "www." is stripped
        domain: String,

        /// Site layout: php (public_html) or laravel (app/public)
        #[arg(value_enum, default_value_t = vds_provisioner::Flavor::Php)]
        flavor: vds_provisioner::Flavor,

        /// Do not add www.<domain> to server_name and the certificate
        #[arg(long = "no-www")]
        no_www: bool,

        /// Configure the vhost over plain HTTP only
        #[arg(long = "skip-certificate")]
        skip_certificate: bool,
    },

    /// Bootstrap a Laravel application on a domain added with the laravel flavor
    InstallProject {
        /// Domain to install into (default: inferred from the current directory)
        domain: Option<String>,
    },

    /// Report host readiness without changing anything
    Doctor,
}

impl Command {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Command::Preinstall => "preinstall",
            Command::Postinstall => "postinstall",
            Command::AddDomain { .. } => "add-domain",
            Command::InstallProject { .. } => "install-project",
            Command::Doctor => "doctor",
        }
    }
}
