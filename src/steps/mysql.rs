//! MySQL accounts and schemas, driven through the `mysql` client over the root socket.
//!
//! Statements travel on stdin so passwords never show up in the process table.

use anyhow::{anyhow, Result};

use crate::probe::mysql_scalar;
use crate::step::{Context, State, Step};

/// Identifiers we create are restricted to `[A-Za-z0-9_]`, so backtick quoting is enough.
fn check_ident(name: &str, max: usize) -> Result<()> {
    if name.is_empty()
        || name.len() > max
        || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
    {
        return Err(anyhow!("invalid MySQL identifier '{name}'"));
    }
    Ok(())
}

pub(crate) fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn run_sql(cx: &Context, sql: &str, what: &str) -> Result<()> {
    cx.run_checked(cx.cmd("mysql").stdin(sql.to_string()), what)?;
    Ok(())
}

fn count_is(cx: &Context, sql: &str, expected: &str) -> Result<bool> {
    Ok(mysql_scalar(cx, sql)?.as_deref() == Some(expected))
}

/// Equivalent of the interactive `mysql_secure_installation` answers: no anonymous users,
/// no `test` schema.
pub struct MysqlSecure;

const ANONYMOUS_USERS: &str = "SELECT COUNT(*) FROM mysql.user WHERE User=''";
const TEST_SCHEMA: &str =
    "SELECT COUNT(*) FROM information_schema.schemata WHERE schema_name='test'";

impl Step for MysqlSecure {
    fn name(&self) -> String {
        "secure mysql".to_string()
    }

    fn check(&self, cx: &Context) -> Result<State> {
        if !count_is(cx, ANONYMOUS_USERS, "0")? {
            return Ok(State::missing("anonymous users present (or server unreachable)"));
        }
        Ok(State::from_bool(
            count_is(cx, TEST_SCHEMA, "0")?,
            "test database present",
        ))
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        run_sql(
            cx,
            "DELETE FROM mysql.user WHERE User='';\n\
             DROP DATABASE IF EXISTS test;\n\
             DELETE FROM mysql.db WHERE Db='test' OR Db='test\\_%';\n\
             FLUSH PRIVILEGES;\n",
            "mysql secure",
        )
    }
}

pub struct MysqlDatabase {
    name: String,
}

impl MysqlDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Step for MysqlDatabase {
    fn name(&self) -> String {
        format!("create database {}", self.name)
    }

    fn check(&self, cx: &Context) -> Result<State> {
        check_ident(&self.name, 64)?;
        let sql = format!(
            "SELECT COUNT(*) FROM information_schema.schemata WHERE schema_name={}",
            quote_literal(&self.name)
        );
        Ok(State::from_bool(count_is(cx, &sql, "1")?, "database absent"))
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        check_ident(&self.name, 64)?;
        run_sql(
            cx,
            &format!(
                "CREATE DATABASE IF NOT EXISTS `{}` CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci;\n",
                self.name
            ),
            "mysql create database",
        )
    }
}

/// What a [`MysqlUser`] is granted.
#[derive(Debug, Clone)]
pub enum Grant {
    /// Everything, including GRANT OPTION (the server admin account).
    Global,
    Database(String),
}

/// `user@localhost` with a password from the credentials file.
pub struct MysqlUser {
    user: String,
    grant: Grant,
}

impl MysqlUser {
    pub fn new(user: impl Into<String>, grant: Grant) -> Self {
        Self {
            user: user.into(),
            grant,
        }
    }

    /// Project accounts are keyed by their database, the admin account by its user name.
    pub fn credential_label(&self) -> String {
        match &self.grant {
            Grant::Global => format!("mysql_{}_password", self.user),
            Grant::Database(db) => Self::database_label(db),
        }
    }

    pub fn database_label(db: &str) -> String {
        format!("mysql_{db}_password")
    }

    fn grant_query(&self) -> String {
        let user = quote_literal(&self.user);
        match &self.grant {
            Grant::Global => format!(
                "SELECT COUNT(*) FROM mysql.user WHERE User={user} AND Host='localhost' AND Grant_priv='Y'"
            ),
            Grant::Database(db) => format!(
                "SELECT COUNT(*) FROM mysql.db WHERE User={user} AND Host='localhost' AND Db={}",
                quote_literal(db)
            ),
        }
    }

    fn statements(&self, password: &str) -> Result<String> {
        check_ident(&self.user, 32)?;
        let account = format!("{}@'localhost'", quote_literal(&self.user));
        let pw = quote_literal(password);
        let grant = match &self.grant {
            Grant::Global => format!("GRANT ALL PRIVILEGES ON *.* TO {account} WITH GRANT OPTION;"),
            Grant::Database(db) => {
                check_ident(db, 64)?;
                format!("GRANT ALL PRIVILEGES ON `{db}`.* TO {account};")
            }
        };
        Ok(format!(
            "CREATE USER IF NOT EXISTS {account} IDENTIFIED BY {pw};\n\
             ALTER USER {account} IDENTIFIED BY {pw};\n\
             {grant}\n\
             FLUSH PRIVILEGES;\n"
        ))
    }
}

impl Step for MysqlUser {
    fn name(&self) -> String {
        let scope = match &self.grant {
            Grant::Global => "*.*".to_string(),
            Grant::Database(db) => format!("{db}.*"),
        };
        format!("create mysql user {}@localhost on {scope}", self.user)
    }

    fn check(&self, cx: &Context) -> Result<State> {
        check_ident(&self.user, 32)?;
        let sql = format!(
            "SELECT COUNT(*) FROM mysql.user WHERE User={} AND Host='localhost'",
            quote_literal(&self.user)
        );
        if !count_is(cx, &sql, "1")? {
            return Ok(State::missing("account absent"));
        }
        if !count_is(cx, &self.grant_query(), "1")? {
            return Ok(State::missing("grant absent"));
        }
        // An account without a recorded password is unusable for later playbooks.
        let recorded = cx.creds.get(&self.credential_label())?.is_some();
        Ok(State::from_bool(recorded, "password not recorded"))
    }

    fn apply(&self, cx: &Context) -> Result<()> {
        let password = cx.creds.get_or_create(&self.credential_label())?;
        run_sql(cx, &self.statements(&password)?, "mysql create user")
    }
}
