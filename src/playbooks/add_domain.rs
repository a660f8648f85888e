use anyhow::Result;

use crate::playbooks::postinstall::phpmyadmin_include;
use crate::sentinel::Scheme;
use crate::site::{Flavor, Site};
use crate::step::{Context, Handler, Playbook};
use crate::steps::{Certificate, EnsureDirs, Symlink, VerifyVhost, WriteFile};
use crate::sysinfo::fpm_tuning;
use crate::template::{render, Vars};

const VHOST_PHP: &str = include_str!("../templates/nginx_vhost_php.conf");
const VHOST_LARAVEL: &str = include_str!("../templates/nginx_vhost_laravel.conf");
const FPM_POOL: &str = include_str!("../templates/fpm_pool.conf");

#[derive(Debug, Clone)]
pub struct AddDomain {
    pub domain: String,
    pub flavor: Flavor,
    pub with_www: bool,
    pub certificate: bool,
}

fn server_names(domain: &str, with_www: bool) -> String {
    if with_www {
        format!("{domain} www.{domain}")
    } else {
        domain.to_string()
    }
}

pub fn render_vhost(cx: &Context, site: &Site, with_www: bool) -> Result<String> {
    let template = match site.flavor {
        Flavor::Php => VHOST_PHP,
        Flavor::Laravel => VHOST_LARAVEL,
    };
    render(
        template,
        &Vars::new()
            .set("domain", site.domain.clone())
            .set("server_names", server_names(&site.domain, with_www))
            .set("docroot", site.docroot.display().to_string())
            .set("log_dir", site.log_dir.display().to_string())
            .set("fpm_socket", site.fpm_socket(&cx.settings).display().to_string())
            .set("phpmyadmin_include", phpmyadmin_include(cx)),
    )
}

pub fn render_pool(cx: &Context, site: &Site) -> Result<String> {
    let t = fpm_tuning(cx.facts.mem_total_mib);
    let s = &cx.settings;
    render(
        FPM_POOL,
        &Vars::new()
            .set("domain", site.domain.clone())
            .set("pool", site.domain.clone())
            .set("user", s.admin_user.clone())
            .set("group", s.web_group.clone())
            .set("fpm_socket", site.fpm_socket(s).display().to_string())
            .set("max_children", t.max_children.to_string())
            .set("start_servers", t.start_servers.to_string())
            .set("min_spare_servers", t.min_spare_servers.to_string())
            .set("max_spare_servers", t.max_spare_servers.to_string())
            .set("log_dir", site.log_dir.display().to_string())
            .set("site_dir", site.dir.display().to_string()),
    )
}

pub fn build(cx: &Context, req: &AddDomain) -> Result<Playbook> {
    let s = &cx.settings;
    let site = Site::new(s, &req.domain, req.flavor);
    let mut pb = Playbook::new(format!("add-domain {} ({})", site.domain, site.flavor));

    pb.push(
        EnsureDirs::new(
            format!("site directories for {}", site.domain),
            vec![site.dir.clone(), site.docroot.clone(), site.log_dir.clone()],
        )
        .owned_by(&s.admin_user, &s.web_group),
    )
    .push(WriteFile::new(site.fpm_pool_path(s), render_pool(cx, &site)?).notify(Handler::RestartPhpFpm))
    .push(
        WriteFile::new(site.vhost_available(), render_vhost(cx, &site, req.with_www)?)
            .notify(Handler::ReloadNginx),
    )
    .push(Symlink::new(site.vhost_available(), site.vhost_enabled()).notify(Handler::ReloadNginx));

    // Round trips only make sense against the live host's nginx.
    let live = cx.fs.is_live();
    if live {
        pb.push(VerifyVhost::new(&site.domain, &site.docroot, Scheme::Http));
    }
    if req.certificate {
        pb.push(Certificate::new(&site.domain, req.with_www));
        if live {
            pb.push(VerifyVhost::new(&site.domain, &site.docroot, Scheme::Https));
        }
    }
    Ok(pb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::util::{HostFs, ScriptedRunner};
    use std::sync::Arc;

    fn cx() -> (tempfile::TempDir, Context) {
        let td = tempfile::tempdir().unwrap();
        let cx = Context::new(Settings::default(), HostFs::new(td.path()), Arc::new(ScriptedRunner::new()));
        (td, cx)
    }

    #[test]
    fn test_laravel_vhost_routes_through_index() {
        let (_td, cx) = cx();
        let site = Site::new(&cx.settings, "shop.example.com", Flavor::Laravel);
        let v = render_vhost(&cx, &site, true).unwrap();
        assert!(v.contains("server_name shop.example.com www.shop.example.com;"));
        assert!(v.contains("root /var/www/shop.example.com/app/public;"));
        assert!(v.contains("try_files $uri $uri/ /index.php?$query_string;"));
        assert!(v.contains("fastcgi_pass unix:/run/php/php8.3-fpm-shop.example.com.sock;"));
        assert!(v.contains("include /etc/nginx/snippets/phpmyadmin.conf;"));
    }

    #[test]
    fn test_php_vhost_without_www() {
        let (_td, cx) = cx();
        let site = Site::new(&cx.settings, "a.com", Flavor::Php);
        let v = render_vhost(&cx, &site, false).unwrap();
        assert!(v.contains("server_name a.com;"));
        assert!(v.contains("root /var/www/a.com/public_html;"));
    }

    #[test]
    fn test_pool_runs_as_admin() {
        let (_td, cx) = cx();
        let site = Site::new(&cx.settings, "a.com", Flavor::Php);
        let pool = render_pool(&cx, &site).unwrap();
        assert!(pool.contains("[a.com]\nuser = vdsadmin\ngroup = www-data\n"));
        assert!(pool.contains("listen = /run/php/php8.3-fpm-a.com.sock"));
        assert!(pool.contains("php_admin_value[open_basedir] = /var/www/a.com:/tmp"));
        assert!(pool.contains("listen.owner = www-data\nlisten.group = www-data\n"));
    }

    #[test]
    fn test_pool_socket_follows_web_group() {
        let td = tempfile::tempdir().unwrap();
        let settings = Settings {
            web_group: "nginx".to_string(),
            ..Settings::default()
        };
        let cx = Context::new(settings, HostFs::new(td.path()), Arc::new(ScriptedRunner::new()));
        let site = Site::new(&cx.settings, "a.com", Flavor::Php);
        let pool = render_pool(&cx, &site).unwrap();
        assert!(pool.contains("group = nginx\n"));
        assert!(pool.contains("listen.owner = nginx\nlisten.group = nginx\n"));
        assert!(!pool.contains("www-data"), "{pool}");
    }

    #[test]
    fn test_rooted_build_skips_round_trips() {
        let (_td, cx) = cx();
        let req = AddDomain {
            domain: "a.com".to_string(),
            flavor: Flavor::Php,
            with_www: true,
            certificate: true,
        };
        let names = build(&cx, &req).unwrap().step_names();
        assert_eq!(
            names,
            vec![
                "create site directories for a.com".to_string(),
                "write /etc/php/8.3/fpm/pool.d/a.com.conf".to_string(),
                "write /etc/nginx/sites-available/a.com.conf".to_string(),
                "link /etc/nginx/sites-enabled/a.com.conf -> /etc/nginx/sites-available/a.com.conf"
                    .to_string(),
                "issue certificate for a.com".to_string(),
            ]
        );
    }

    #[test]
    fn test_live_build_verifies_before_and_after_certificate() {
        let cx = Context::new(Settings::default(), HostFs::default(), Arc::new(ScriptedRunner::new()));
        let req = AddDomain {
            domain: "a.com".to_string(),
            flavor: Flavor::Laravel,
            with_www: false,
            certificate: true,
        };
        let names = build(&cx, &req).unwrap().step_names();
        let tail: Vec<&str> = names.iter().rev().take(3).rev().map(String::as_str).collect();
        assert_eq!(
            tail,
            ["verify http://a.com", "issue certificate for a.com", "verify https://a.com"]
        );
    }
}
