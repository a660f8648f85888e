//! Software that does not come from apt: phpMyAdmin and the ionCube loader.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

use crate::download;
use crate::probe;
use crate::step::{Context, Handler, State, Step};
use crate::template::{render, Vars};

const IONCUBE_INI: &str = include_str!("../templates/ioncube.ini");

/// Unpack the phpMyAdmin release archive into its install directory.
pub struct PhpMyAdminFiles;

impl PhpMyAdminFiles {
    fn install_dir(cx: &Context) -> &Path {
        &cx.settings.phpmyadmin.install_dir
    }
}

impl Step for PhpMyAdminFiles {
    fn name(&self) -> String {
        "install phpMyAdmin".to_string()
    }

    fn check(&self, cx: &Context) -> Result<State> {
        Ok(State::from_bool(
            cx.fs.exists(&Self::install_dir(cx).join("index.php")),
            "not installed",
        ))
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        let archive = download::fetch(&cx.settings.phpmyadmin.url, cx.settings.command_timeout)?;
        let dir = Self::install_dir(cx);
        let files = download::unpack_zip(&archive, &cx.fs.resolve(dir), true)?;
        tracing::info!(files, dir = %dir.display(), "phpMyAdmin unpacked");
        let tmp = dir.join("tmp");
        cx.fs.create_dir_all(&tmp)?;
        let web = &cx.settings.web_group;
        cx.chown_recursive(&tmp, web, web)
    }

    fn verify(&self, cx: &Context) -> Result<()> {
        match self.check(cx)? {
            State::Satisfied => Ok(()),
            State::Missing(_) => Err(anyhow!("archive did not contain index.php at its top level")),
        }
    }
}

/// The ionCube loader for the configured PHP version plus its `mods-available` ini.
pub struct IoncubeLoader;

impl IoncubeLoader {
    fn loader_name(cx: &Context) -> String {
        format!("ioncube_loader_lin_{}.so", cx.settings.php_version)
    }

    pub fn ini_path(cx: &Context) -> PathBuf {
        cx.settings.php_etc_dir().join("mods-available/ioncube.ini")
    }

    fn ini(loader: &Path) -> Result<String> {
        render(
            IONCUBE_INI,
            &Vars::new().set("loader_path", loader.display().to_string()),
        )
    }
}

impl Step for IoncubeLoader {
    fn name(&self) -> String {
        "install ionCube loader".to_string()
    }

    fn check(&self, cx: &Context) -> Result<State> {
        let Some(ext_dir) = probe::php_extension_dir(cx)? else {
            return Ok(State::missing(format!(
                "php{} not installed",
                cx.settings.php_version
            )));
        };
        let loader = ext_dir.join(Self::loader_name(cx));
        if !cx.fs.exists(&loader) {
            return Ok(State::missing("loader absent"));
        }
        let ini = cx.fs.read(&Self::ini_path(cx))?;
        Ok(State::from_bool(
            ini.as_deref() == Some(Self::ini(&loader)?.as_str()),
            "ini missing or stale",
        ))
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        let ext_dir = probe::php_extension_dir(cx)?
            .ok_or_else(|| anyhow!("cannot determine the PHP extension_dir"))?;
        let name = Self::loader_name(cx);
        let archive = download::fetch(&cx.settings.ioncube.url, cx.settings.command_timeout)?;
        let bytes = download::read_zip_entry(&archive, &format!("/{name}"))?.ok_or_else(|| {
            anyhow!(
                "ionCube archive has no loader for PHP {}",
                cx.settings.php_version
            )
        })?;
        let loader = ext_dir.join(&name);
        cx.fs.write(&loader, &bytes, Some(0o644))?;
        cx.fs
            .write(&Self::ini_path(cx), Self::ini(&loader)?.as_bytes(), Some(0o644))
    }

    fn notifies(&self) -> Vec<Handler> {
        vec![Handler::RestartPhpFpm]
    }
}
