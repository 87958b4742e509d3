use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Internal requirement tracking tool")]
pub struct Cli {
    /// Path to a config file (skips the normal search order)
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[clap(long, short = 'f', global = true, value_enum)]
    pub format: Option<OutputFormat>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in, log out, show the current session
    #[clap(subcommand)]
    Auth(AuthCommand),

    /// Work with requirement tickets
    #[clap(subcommand)]
    Req(ReqCommand),

    /// User accounts
    #[clap(subcommand)]
    User(UserCommand),

    /// Administrative operations
    #[clap(subcommand)]
    Admin(AdminCommand),

    /// Create the database schema and the stock accounts
    Init,
}

#[derive(Subcommand, Debug)]
pub enum AuthCommand {
    /// Log in and save a local session
    Login {
        /// Username (prompted when omitted)
        #[clap(long, short)]
        username: Option<String>,

        /// Password (prompted when omitted)
        #[clap(long, short)]
        password: Option<String>,
    },

    /// Clear the saved session
    Logout,

    /// Show who is currently logged in
    Whoami,
}

#[derive(Subcommand, Debug)]
pub enum ReqCommand {
    /// List your ticket queue (staff) or the tickets you dispatched (admin)
    List {
        /// Only show tickets with this status
        #[clap(long, short)]
        status: Option<String>,

        /// Only show tickets assigned to this user id (admin)
        #[clap(long, short)]
        assignee: Option<i64>,
    },

    /// Show one ticket in full
    Show {
        id: i64,
    },

    /// Create a ticket, dispatched immediately or on a schedule (admin)
    Create {
        /// Ticket title
        #[clap(long, short)]
        title: String,

        /// Ticket description
        #[clap(long, short)]
        description: String,

        /// Username of the staff member to assign
        #[clap(long, short)]
        assignee: String,

        /// Priority (normal/urgent)
        #[clap(long, short, default_value = "normal")]
        priority: String,

        /// Dispatch later at this local time (format: YYYY-MM-DD HH:MM)
        #[clap(long, short)]
        scheduled: Option<String>,
    },

    /// Hand in a completion note for review (assignee)
    Submit {
        id: i64,

        /// Completion note (prompted when omitted)
        #[clap(long, short)]
        message: Option<String>,
    },

    /// Accept a submitted ticket (assigner)
    Approve {
        id: i64,
    },

    /// Send a submitted ticket back to pending (assigner)
    Reject {
        id: i64,
    },

    /// Void a ticket permanently (assigner)
    Invalidate {
        id: i64,
    },

    /// Move a ticket to the trash (assigner)
    Delete {
        id: i64,
    },

    /// Take a ticket out of the trash (assigner)
    Restore {
        id: i64,
    },
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// List user accounts
    List {
        /// Only show accounts with this role (admin/staff)
        #[clap(long, short)]
        role: Option<String>,
    },

    /// Show one user account
    Show {
        id: i64,
    },

    /// Register a new account (admin)
    Create {
        #[clap(long, short)]
        username: String,

        /// Password (prompted when omitted)
        #[clap(long, short)]
        password: Option<String>,

        /// Display name
        #[clap(long, short)]
        name: String,

        #[clap(long, short)]
        email: String,

        /// Role (admin/staff)
        #[clap(long, short, default_value = "staff")]
        role: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum AdminCommand {
    /// List scheduled tickets; optionally promote the due ones now
    Scheduled {
        /// Run one dispatch pass before listing
        #[clap(long, short)]
        dispatch: bool,

        /// Only show tickets scheduled for this user id
        #[clap(long, short)]
        assignee: Option<i64>,
    },

    /// Cancel a scheduled ticket before it is dispatched
    Cancel {
        id: i64,
    },

    /// List the trash; optionally restore one ticket
    Trash {
        /// Restore the ticket with this id
        #[clap(long, short)]
        restore: Option<i64>,
    },

    /// Run the dispatch scheduler in the foreground
    Watch,

    /// Permanently remove every requirement
    Cleanup {
        /// Skip the confirmation prompt
        #[clap(long, short)]
        confirm: bool,
    },
}
