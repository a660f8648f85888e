//! Concrete [`Step`](crate::step::Step) implementations the playbooks are assembled from.

mod cron;
mod files;
mod laravel;
mod mysql;
mod packages;
mod services;
mod users;
mod vendor;
mod web;

pub use cron::CrontabEntry;
pub use files::{EditFile, EnsureDirs, RemoveFile, Symlink, WriteFile};
pub use laravel::{
    AppKey, AssetBuild, ComposerProject, EnvFile, Migrate, StorageLink, WritablePaths,
    WRITABLE_DIRS,
};
pub use mysql::{Grant, MysqlDatabase, MysqlSecure, MysqlUser};
pub use packages::{AptInstall, AptRepository, AptUpgrade};
pub use services::ServiceRunning;
pub use users::{MutualGroups, SystemUser, UserPassword};
pub use vendor::{IoncubeLoader, PhpMyAdminFiles};
pub use web::{Certificate, VerifyVhost};
