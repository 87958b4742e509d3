mod cli;
mod config;
mod output;
mod prompts;
mod session;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use clap::Parser;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use reqmgr_core::{
    auth, Database, DispatchScheduler, Engine, Error as CoreError, Identity, NewRequirement,
    NewUser, Priority, Role, SchedulerConfig, Status,
};

use crate::cli::{AdminCommand, AuthCommand, Cli, Command, ReqCommand, UserCommand};
use crate::config::Config;
use crate::output::OutputFormat;
use crate::session::{Session, SessionStore};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("not logged in; run 'reqmgr auth login' first")]
    NotAuthenticated,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        output::error(&err.to_string());
        std::process::exit(exit_code(&err));
    }
}

/// 0 ok, 1 operation failure, 2 not logged in, 3 permission denied.
fn exit_code(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<CliError>().is_some() {
        return 2;
    }
    match err.downcast_ref::<CoreError>() {
        Some(CoreError::Permission(_)) => 3,
        _ => 1,
    }
}

fn run(cli: Cli) -> Result<()> {
    let app = App::init(&cli)?;

    match cli.command {
        Command::Auth(cmd) => app.handle_auth(cmd),
        Command::Req(cmd) => app.handle_req(cmd),
        Command::User(cmd) => app.handle_user(cmd),
        Command::Admin(cmd) => app.handle_admin(cmd),
        Command::Init => app.handle_init(),
    }
}

struct App {
    config: Config,
    format: OutputFormat,
    db: Arc<Database>,
    engine: Engine,
    sessions: SessionStore,
}

impl App {
    fn init(cli: &Cli) -> Result<Self> {
        let config = config::load(cli.config.as_deref())?;
        let format = cli.format.unwrap_or(config.output.default_format);

        let db = Arc::new(Database::open(&config.database.path)?);
        let engine = Engine::new(Arc::clone(&db));
        let sessions = SessionStore::default_location()?;

        Ok(Self {
            config,
            format,
            db,
            engine,
            sessions,
        })
    }

    /// The identity from the saved session, or exit code 2.
    fn require_identity(&self) -> Result<Identity> {
        match self.sessions.load()? {
            Some(session) => Ok(session.identity()),
            None => Err(CliError::NotAuthenticated.into()),
        }
    }

    fn require_admin(&self) -> Result<Identity> {
        let caller = self.require_identity()?;
        if !caller.is_admin() {
            return Err(CoreError::Permission(format!(
                "{} does not have the admin role",
                caller.username
            ))
            .into());
        }
        Ok(caller)
    }

    fn render<T: serde::Serialize>(
        &self,
        headers: &[&str],
        rows: Vec<Vec<String>>,
        records: &T,
    ) -> Result<()> {
        let headers: &[&str] = if self.config.output.show_headers {
            headers
        } else {
            &[]
        };

        let max_rows = self.config.output.max_rows;
        if self.format == OutputFormat::Table && rows.len() > max_rows {
            output::warning(&format!(
                "Showing the first {} of {} rows",
                max_rows,
                rows.len()
            ));
            return output::render(self.format, headers, &rows[..max_rows], records);
        }

        output::render(self.format, headers, &rows, records)
    }

    // =========================================================================
    // auth
    // =========================================================================

    fn handle_auth(&self, cmd: AuthCommand) -> Result<()> {
        match cmd {
            AuthCommand::Login { username, password } => {
                let username = match username {
                    Some(u) => u,
                    None => prompts::prompt_username()?,
                };
                let password = match password {
                    Some(p) => p,
                    None => prompts::prompt_password()?,
                };

                let identity =
                    auth::authenticate(&self.db, &auth::PlainText, &username, &password)?;

                if self.config.auth.save_session {
                    let session = Session::new(&identity, self.config.auth.session_timeout);
                    self.sessions.save(&session)?;
                }

                output::success(&format!(
                    "Logged in as {} ({})",
                    identity.display_name, identity.role
                ));
                Ok(())
            }
            AuthCommand::Logout => {
                if self.sessions.clear()? {
                    output::success("Logged out");
                } else {
                    println!("No active session.");
                }
                Ok(())
            }
            AuthCommand::Whoami => {
                match self.sessions.load()? {
                    Some(session) => {
                        println!("{:<12} {}", "User:", session.username);
                        println!("{:<12} {}", "Name:", session.display_name);
                        println!("{:<12} {}", "Role:", session.role);
                        println!(
                            "{:<12} {}",
                            "Expires:",
                            session
                                .expires_at
                                .with_timezone(&Local)
                                .format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                    None => println!("Not logged in."),
                }
                Ok(())
            }
        }
    }

    // =========================================================================
    // req
    // =========================================================================

    fn handle_req(&self, cmd: ReqCommand) -> Result<()> {
        match cmd {
            ReqCommand::List { status, assignee } => {
                let caller = self.require_identity()?;
                let status = parse_optional_status(status.as_deref())?;

                let tickets = if caller.is_admin() {
                    self.engine
                        .list_dispatched_for_assigner(&caller, assignee, status)?
                } else {
                    if assignee.is_some() {
                        return Err(CoreError::Validation(
                            "only administrators can filter by assignee".to_string(),
                        )
                        .into());
                    }
                    self.engine.list_for_assignee(&caller, status)?
                };

                self.render(
                    &output::TICKET_HEADERS,
                    output::ticket_rows(&tickets),
                    &tickets,
                )
            }
            ReqCommand::Show { id } => {
                let caller = self.require_identity()?;
                let ticket = self.engine.ticket(&caller, id)?;
                if self.format == OutputFormat::Json {
                    println!("{}", serde_json::to_string_pretty(&ticket)?);
                } else {
                    output::print_ticket_detail(&ticket);
                }
                Ok(())
            }
            ReqCommand::Create {
                title,
                description,
                assignee,
                priority,
                scheduled,
            } => {
                let caller = self.require_identity()?;

                let assignee_user = self
                    .db
                    .user_by_username(&assignee)?
                    .ok_or_else(|| CoreError::Validation(format!("unknown user '{}'", assignee)))?;
                let priority: Priority = priority.parse::<Priority>().map_err(anyhow::Error::from)?;
                let scheduled_time = scheduled
                    .as_deref()
                    .map(parse_local_schedule)
                    .transpose()?;

                let id = self.engine.create(
                    &caller,
                    NewRequirement {
                        title,
                        description,
                        assignee_id: assignee_user.id,
                        priority,
                        scheduled_time,
                    },
                )?;

                match scheduled {
                    Some(at) => output::success(&format!(
                        "Requirement {} scheduled for dispatch at {}",
                        id, at
                    )),
                    None => output::success(&format!(
                        "Requirement {} created and dispatched to {}",
                        id, assignee_user.display_name
                    )),
                }
                Ok(())
            }
            ReqCommand::Submit { id, message } => {
                let caller = self.require_identity()?;
                let message = match message {
                    Some(m) => m,
                    None => prompts::prompt_completion_note()?,
                };
                self.engine.submit(&caller, id, &message)?;
                output::success(&format!("Requirement {} submitted for review", id));
                Ok(())
            }
            ReqCommand::Approve { id } => {
                let caller = self.require_identity()?;
                self.engine.approve(&caller, id)?;
                output::success(&format!("Requirement {} approved", id));
                Ok(())
            }
            ReqCommand::Reject { id } => {
                let caller = self.require_identity()?;
                self.engine.reject(&caller, id)?;
                output::success(&format!("Requirement {} sent back to pending", id));
                Ok(())
            }
            ReqCommand::Invalidate { id } => {
                let caller = self.require_identity()?;
                self.engine.invalidate(&caller, id)?;
                output::success(&format!("Requirement {} invalidated", id));
                Ok(())
            }
            ReqCommand::Delete { id } => {
                let caller = self.require_identity()?;
                self.engine.delete(&caller, id)?;
                output::success(&format!("Requirement {} moved to the trash", id));
                Ok(())
            }
            ReqCommand::Restore { id } => {
                let caller = self.require_identity()?;
                self.engine.restore(&caller, id)?;
                output::success(&format!("Requirement {} restored", id));
                Ok(())
            }
        }
    }

    // =========================================================================
    // user
    // =========================================================================

    fn handle_user(&self, cmd: UserCommand) -> Result<()> {
        match cmd {
            UserCommand::List { role } => {
                self.require_identity()?;
                let role = role
                    .as_deref()
                    .map(|r| r.parse::<Role>())
                    .transpose()
                    .map_err(anyhow::Error::from)?;
                let users = self.db.list_users(role)?;
                self.render(&output::USER_HEADERS, output::user_rows(&users), &users)
            }
            UserCommand::Show { id } => {
                self.require_identity()?;
                let user = self
                    .db
                    .user_by_id(id)?
                    .ok_or_else(|| CoreError::NotFound(format!("user {}", id)))?;
                if self.format == OutputFormat::Json {
                    println!("{}", serde_json::to_string_pretty(&user)?);
                } else {
                    println!("{:<12} {}", "ID:", user.id);
                    println!("{:<12} {}", "Username:", user.username);
                    println!("{:<12} {}", "Name:", user.display_name);
                    println!("{:<12} {}", "Email:", user.email);
                    println!("{:<12} {}", "Role:", user.role);
                }
                Ok(())
            }
            UserCommand::Create {
                username,
                password,
                name,
                email,
                role,
            } => {
                self.require_admin()?;
                let password = match password {
                    Some(p) => p,
                    None => prompts::prompt_new_password()?,
                };
                let role: Role = role.parse::<Role>().map_err(anyhow::Error::from)?;

                let id = auth::register_user(
                    &self.db,
                    &auth::PlainText,
                    &NewUser {
                        username: username.clone(),
                        password,
                        display_name: name,
                        email,
                        role,
                    },
                )?;
                output::success(&format!("User '{}' created (id {})", username, id));
                Ok(())
            }
        }
    }

    // =========================================================================
    // admin
    // =========================================================================

    fn handle_admin(&self, cmd: AdminCommand) -> Result<()> {
        match cmd {
            AdminCommand::Scheduled { dispatch, assignee } => {
                let caller = self.require_identity()?;

                if dispatch {
                    self.require_admin()?;
                    let count = self.engine.dispatch_due()?;
                    if count > 0 {
                        output::success(&format!("Dispatched {} due requirement(s)", count));
                    } else {
                        println!("Nothing was due.");
                    }
                }

                let tickets = self.engine.list_scheduled_for_assigner(&caller, assignee)?;
                self.render(
                    &output::SCHEDULED_HEADERS,
                    output::scheduled_rows(&tickets),
                    &tickets,
                )
            }
            AdminCommand::Cancel { id } => {
                let caller = self.require_identity()?;
                self.engine.cancel_scheduled(&caller, id)?;
                output::success(&format!("Scheduled requirement {} cancelled", id));
                Ok(())
            }
            AdminCommand::Trash { restore } => {
                let caller = self.require_identity()?;

                if let Some(id) = restore {
                    self.engine.restore(&caller, id)?;
                    output::success(&format!("Requirement {} restored", id));
                }

                let tickets = self.engine.list_deleted_for_assigner(&caller)?;
                self.render(
                    &output::TRASH_HEADERS,
                    output::trash_rows(&tickets),
                    &tickets,
                )
            }
            AdminCommand::Watch => self.watch(),
            AdminCommand::Cleanup { confirm } => {
                let caller = self.require_admin()?;

                if !confirm
                    && !prompts::confirm("Permanently remove every requirement?")?
                {
                    println!("Aborted.");
                    return Ok(());
                }

                let count = self.engine.purge_all(&caller)?;
                output::success(&format!("Removed {} requirement(s)", count));
                Ok(())
            }
        }
    }

    /// Runs the dispatch scheduler in the foreground until Enter is
    /// pressed, echoing promotion notices as they arrive.
    fn watch(&self) -> Result<()> {
        self.require_admin()?;

        let mut scheduler =
            DispatchScheduler::start(Arc::clone(&self.db), SchedulerConfig::default());
        println!("Dispatch scheduler running; press Enter to stop.");

        let (stdin_tx, stdin_rx) = mpsc::channel();
        thread::spawn(move || {
            let mut line = String::new();
            let _ = std::io::stdin().read_line(&mut line);
            let _ = stdin_tx.send(());
        });

        loop {
            for notice in scheduler.drain_notices() {
                output::success(&format!(
                    "{} scheduled requirement(s) dispatched at {}",
                    notice.count,
                    notice.at.with_timezone(&Local).format("%H:%M:%S")
                ));
            }
            if stdin_rx.recv_timeout(Duration::from_millis(500)).is_ok() {
                break;
            }
        }

        scheduler.stop();
        println!("Scheduler stopped.");
        Ok(())
    }

    fn handle_init(&self) -> Result<()> {
        let added = self.db.seed_default_users()?;
        output::success(&format!(
            "Database ready at {} ({} stock account(s) added)",
            self.config.database.path.display(),
            added
        ));
        Ok(())
    }
}

fn parse_optional_status(raw: Option<&str>) -> Result<Option<Status>> {
    raw.map(|s| s.parse::<Status>())
        .transpose()
        .map_err(anyhow::Error::from)
}

/// Parses `YYYY-MM-DD HH:MM` as local time and converts to UTC.
fn parse_local_schedule(raw: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M")
        .with_context(|| format!("'{}' is not a valid time (expected YYYY-MM-DD HH:MM)", raw))?;
    let local = Local
        .from_local_datetime(&naive)
        .single()
        .with_context(|| format!("'{}' is ambiguous in the local time zone", raw))?;
    Ok(local.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_local_schedule_accepts_the_documented_format() {
        let parsed = parse_local_schedule("2030-01-15 09:30").unwrap();
        let back = parsed.with_timezone(&Local);
        assert_eq!(back.format("%Y-%m-%d %H:%M").to_string(), "2030-01-15 09:30");
    }

    #[test]
    fn test_parse_local_schedule_rejects_other_shapes() {
        assert!(parse_local_schedule("2030-01-15").is_err());
        assert!(parse_local_schedule("tomorrow").is_err());
        assert!(parse_local_schedule("2030-01-15T09:30:00Z").is_err());
    }

    #[test]
    fn test_parse_optional_status_is_strict() {
        assert_eq!(
            parse_optional_status(Some("pending")).unwrap(),
            Some(Status::Pending)
        );
        assert_eq!(parse_optional_status(None).unwrap(), None);
        assert!(parse_optional_status(Some("Pending")).is_err());
    }
}
