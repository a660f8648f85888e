use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::step::{Context, Handler, Playbook};
use crate::steps::{
    EditFile, IoncubeLoader, PhpMyAdminFiles, RemoveFile, Symlink, WriteFile,
};
use crate::sysinfo::{fpm_tuning, innodb_buffer_pool_mib, memcached_mib};
use crate::template::{render, Vars};
use crate::util::{id, DirectiveStyle};

const NGINX_TUNING: &str = include_str!("../templates/nginx_tuning.conf");
const NGINX_DEFAULT_SERVER: &str = include_str!("../templates/nginx_default_server.conf");
const PHP_OVERRIDES: &str = include_str!("../templates/php_overrides.ini");
const MYSQL_TUNING: &str = include_str!("../templates/mysql_tuning.cnf");
const FAIL2BAN_JAIL: &str = include_str!("../templates/fail2ban_jail.local");
const LOGROTATE_SITES: &str = include_str!("../templates/logrotate_sites");
const PHPMYADMIN_CONFIG: &str = include_str!("../templates/phpmyadmin_config.inc.php");
const PHPMYADMIN_SNIPPET: &str = include_str!("../templates/phpmyadmin_snippet.conf");

pub const UPLOAD_LIMIT: &str = "64M";
const MEMORY_LIMIT: &str = "256M";
const MAX_EXECUTION_TIME: u32 = 60;
const MAX_CONNECTIONS: u32 = 200;

pub const PHPMYADMIN_SNIPPET_PATH: &str = "/etc/nginx/snippets/phpmyadmin.conf";
const DEFAULT_SERVER_NAME: &str = "000-default-deny.conf";

/// The stock `www` pool socket; phpMyAdmin runs there rather than in a site pool.
pub fn stock_fpm_socket(cx: &Context) -> String {
    format!("/run/php/php{}-fpm.sock", cx.settings.php_version)
}

/// Vhost include line for the phpMyAdmin snippet, or nothing when phpMyAdmin is disabled.
pub fn phpmyadmin_include(cx: &Context) -> String {
    if cx.settings.phpmyadmin.enabled {
        format!("    include {PHPMYADMIN_SNIPPET_PATH};")
    } else {
        String::new()
    }
}

fn nginx(pb: &mut Playbook) -> Result<()> {
    let tuning = render(
        NGINX_TUNING,
        &Vars::new().set("client_max_body_size", UPLOAD_LIMIT),
    )?;
    let available = Path::new("/etc/nginx/sites-available").join(DEFAULT_SERVER_NAME);
    pb.push(WriteFile::new("/etc/nginx/conf.d/00-vds-tuning.conf", tuning).notify(Handler::ReloadNginx))
        .push(WriteFile::new(&available, NGINX_DEFAULT_SERVER).notify(Handler::ReloadNginx))
        .push(
            Symlink::new(
                &available,
                Path::new("/etc/nginx/sites-enabled").join(DEFAULT_SERVER_NAME),
            )
            .notify(Handler::ReloadNginx),
        )
        .push(RemoveFile::new("/etc/nginx/sites-enabled/default").notify(Handler::ReloadNginx));
    Ok(())
}

fn php(cx: &Context, pb: &mut Playbook) -> Result<()> {
    let etc = cx.settings.php_etc_dir();
    let overrides = render(
        PHP_OVERRIDES,
        &Vars::new()
            .set("memory_limit", MEMORY_LIMIT)
            .set("upload_max", UPLOAD_LIMIT)
            .set("max_execution_time", MAX_EXECUTION_TIME.to_string()),
    )?;
    for sapi in ["fpm", "cli"] {
        pb.push(
            WriteFile::new(etc.join(sapi).join("conf.d/99-vds.ini"), overrides.clone())
                .notify(Handler::RestartPhpFpm),
        );
    }
    let t = fpm_tuning(cx.facts.mem_total_mib);
    pb.push(
        EditFile::new(etc.join("fpm/pool.d/www.conf"), DirectiveStyle::Equals)
            .set("pm.max_children", t.max_children)
            .set("pm.start_servers", t.start_servers)
            .set("pm.min_spare_servers", t.min_spare_servers)
            .set("pm.max_spare_servers", t.max_spare_servers)
            .notify(Handler::RestartPhpFpm),
    );
    Ok(())
}

fn daemons(cx: &Context, pb: &mut Playbook) -> Result<()> {
    let mem = cx.facts.mem_total_mib;
    let mysql = render(
        MYSQL_TUNING,
        &Vars::new()
            .set("buffer_pool_mib", innodb_buffer_pool_mib(mem).to_string())
            .set("max_connections", MAX_CONNECTIONS.to_string()),
    )?;
    let web_root = cx.settings.web_root.display().to_string();
    let jail = render(FAIL2BAN_JAIL, &Vars::new().set("web_root", web_root.clone()))?;
    let logrotate = render(
        LOGROTATE_SITES,
        &Vars::new()
            .set("web_root", web_root)
            .set("user", cx.settings.admin_user.clone()),
    )?;
    pb.push(WriteFile::new("/etc/mysql/mysql.conf.d/99-vds.cnf", mysql).notify(Handler::RestartMysql))
        .push(
            EditFile::new("/etc/memcached.conf", DirectiveStyle::Flag)
                .set("-m", memcached_mib(mem))
                .notify(Handler::RestartMemcached),
        )
        .push(WriteFile::new("/etc/fail2ban/jail.d/vds.local", jail).notify(Handler::RestartFail2ban))
        .push(WriteFile::new("/etc/logrotate.d/vds-sites", logrotate).mode(0o644));
    Ok(())
}

fn phpmyadmin(cx: &Context, pb: &mut Playbook) -> Result<()> {
    let pma = &cx.settings.phpmyadmin;
    let dir = pma.install_dir.display().to_string();
    // Only used when config.inc.php is first created.
    let secret = id::generate_password(32)?;
    let config = render(
        PHPMYADMIN_CONFIG,
        &Vars::new()
            .set("blowfish_secret", secret)
            .set("install_dir", dir.clone()),
    )?;
    let snippet = render(
        PHPMYADMIN_SNIPPET,
        &Vars::new()
            .set("location", pma.location.clone())
            .set("install_dir", dir)
            .set("fpm_socket", stock_fpm_socket(cx)),
    )?;
    pb.push(PhpMyAdminFiles)
        .push(
            WriteFile::new(pma.install_dir.join("config.inc.php"), config)
                .create_only()
                .mode(0o644),
        )
        .push(WriteFile::new(PHPMYADMIN_SNIPPET_PATH, snippet).notify(Handler::ReloadNginx));
    Ok(())
}

fn ioncube(cx: &Context, pb: &mut Playbook) {
    let etc = cx.settings.php_etc_dir();
    let ini = IoncubeLoader::ini_path(cx);
    pb.push(IoncubeLoader);
    for sapi in ["fpm", "cli"] {
        let link: PathBuf = etc.join(sapi).join("conf.d/00-ioncube.ini");
        pb.push(Symlink::new(&ini, link).notify(Handler::RestartPhpFpm));
    }
}

pub fn build(cx: &Context) -> Result<Playbook> {
    let mut pb = Playbook::new("postinstall");
    nginx(&mut pb)?;
    php(cx, &mut pb)?;
    daemons(cx, &mut pb)?;
    if cx.settings.phpmyadmin.enabled {
        phpmyadmin(cx, &mut pb)?;
    }
    if cx.settings.ioncube.enabled {
        ioncube(cx, &mut pb);
    }
    Ok(pb)
}
