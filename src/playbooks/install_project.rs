use anyhow::Result;

use crate::errors::ProvisionError;
use crate::site::{database_names, Flavor, Site};
use crate::step::{Context, Handler, Playbook};
use crate::steps::{
    AppKey, AssetBuild, Certificate, ComposerProject, CrontabEntry, EnvFile, Grant, Migrate,
    MysqlDatabase, MysqlUser, StorageLink, WritablePaths, WriteFile,
};
use crate::template::{render, Vars};

const SUPERVISOR_WORKER: &str = include_str!("../templates/supervisor_worker.conf");

/// The domain must already have a laravel vhost from `add-domain <domain> laravel`.
fn require_laravel_vhost(cx: &Context, site: &Site) -> Result<()> {
    let vhost = cx.fs.read(&site.vhost_available())?.ok_or_else(|| {
        ProvisionError::Invalid(format!(
            "no vhost for {}; run `add-domain {} laravel` first",
            site.domain, site.domain
        ))
    })?;
    let root_line = format!("root {};", site.docroot.display());
    if !vhost.contains(&root_line) {
        return Err(ProvisionError::Invalid(format!(
            "the vhost for {} does not serve {}; it was not created with the laravel flavor",
            site.domain,
            site.docroot.display()
        ))
        .into());
    }
    Ok(())
}

pub fn schedule_line(site: &Site) -> String {
    format!(
        "* * * * * cd {} && php artisan schedule:run >> /dev/null 2>&1",
        site.project_dir().display()
    )
}

pub fn render_worker(cx: &Context, site: &Site) -> Result<String> {
    render(
        SUPERVISOR_WORKER,
        &Vars::new()
            .set("domain", site.domain.clone())
            .set("program", site.worker_program())
            .set("project_dir", site.project_dir().display().to_string())
            .set("user", cx.settings.admin_user.clone())
            .set("workers", cx.settings.laravel.queue_workers.max(1).to_string())
            .set("log_dir", site.log_dir.display().to_string()),
    )
}

pub fn build(cx: &Context, domain: &str) -> Result<Playbook> {
    let s = &cx.settings;
    let site = Site::new(s, domain, Flavor::Laravel);
    require_laravel_vhost(cx, &site)?;

    let (db, db_user) = database_names(&site.domain);
    let project = site.project_dir();
    let scheme = if cx.fs.exists(&Certificate::fullchain(&site.domain)) {
        "https"
    } else {
        "http"
    };

    let db_password_label = MysqlUser::database_label(&db);

    let mut pb = Playbook::new(format!("install-project {}", site.domain));
    pb.push(MysqlDatabase::new(db.clone()))
        .push(MysqlUser::new(db_user.clone(), Grant::Database(db.clone())))
        .push(ComposerProject::new(&site.dir))
        .push(
            EnvFile::new(&project)
                .set("APP_NAME", site.domain.clone())
                .set("APP_ENV", "production")
                .set("APP_DEBUG", "false")
                .set("APP_URL", format!("{scheme}://{}", site.domain))
                .set("DB_CONNECTION", "mysql")
                .set("DB_HOST", "localhost")
                .set("DB_PORT", "3306")
                .set("DB_DATABASE", db)
                .set("DB_USERNAME", db_user.clone())
                .credential("DB_PASSWORD", &db_password_label)
                .set("CACHE_STORE", "memcached")
                .set("QUEUE_CONNECTION", "database"),
        )
        .push(AppKey::new(&project))
        .push(Migrate::new(&project))
        .push(StorageLink::new(&project))
        .push(AssetBuild::new(&project))
        .push(WritablePaths::new(&project))
        .push(
            WriteFile::new(site.supervisor_conf(), render_worker(cx, &site)?)
                .notify(Handler::SupervisorUpdate),
        )
        .push(CrontabEntry::new(&s.admin_user, schedule_line(&site)));
    Ok(pb)
}
