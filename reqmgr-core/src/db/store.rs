//! SQLite-backed requirement store.
//!
//! The `Database` owns the connection and exposes read queries plus the
//! conditional write statements the lifecycle engine runs. Every state
//! transition is a single `UPDATE`/`DELETE` whose `WHERE` clause carries
//! the precondition; the affected-row count is the success signal, so a
//! precondition check and its write can never be split by another caller.
//!
//! The write statements are crate-private on purpose: front ends go
//! through the engine, which is the sole writer of lifecycle fields.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::models::{NewRequirement, Requirement, Role, Status, Ticket, User};

use super::migrations;

/// Columns of a requirement row, in the order the mappers expect.
const REQ_COLUMNS: &str = "r.id, r.title, r.description, r.assigner_id, r.assignee_id, \
     r.status, r.priority, r.created_at, r.scheduled_time, r.is_dispatched, \
     r.completed_at, r.comment, r.is_deleted, r.deleted_at";

/// Joins pulling in both display names; appended after `REQ_COLUMNS`.
const NAME_JOINS: &str = "JOIN users ar ON r.assigner_id = ar.id \
     JOIN users ae ON r.assignee_id = ae.id";

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Opens (creating if needed) the database at `path` and migrates it
    /// to the current schema version.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Validation(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        // WAL for concurrent readers alongside the scheduler's writes.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        migrations::migrate(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Inserts a new user. Fails with a validation error when the username
    /// is already taken.
    pub fn insert_user(
        &self,
        username: &str,
        credential: &str,
        display_name: &str,
        email: &str,
        role: Role,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();

        let taken: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE username = ?1",
            [username],
            |row| row.get(0),
        )?;
        if taken > 0 {
            return Err(Error::Validation(format!(
                "username '{}' is already taken",
                username
            )));
        }

        conn.execute(
            "INSERT INTO users (username, credential, display_name, email, role)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![username, credential, display_name, email, role.as_str()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, username, credential, display_name, email, role
                 FROM users WHERE username = ?1",
                [username],
                map_user_row,
            )
            .optional()?;
        row.map(UserRow::into_user).transpose()
    }

    pub fn user_by_id(&self, id: i64) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, username, credential, display_name, email, role
                 FROM users WHERE id = ?1",
                [id],
                map_user_row,
            )
            .optional()?;
        row.map(UserRow::into_user).transpose()
    }

    /// Lists users, optionally restricted to one role, ordered by id.
    pub fn list_users(&self, role: Option<Role>) -> Result<Vec<User>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, username, credential, display_name, email, role
             FROM users
             WHERE (?1 IS NULL OR role = ?1)
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![role.map(|r| r.as_str())], map_user_row)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?.into_user()?);
        }
        Ok(users)
    }

    /// All staff accounts (the dispatch targets).
    pub fn list_staff(&self) -> Result<Vec<User>> {
        self.list_users(Some(Role::Staff))
    }

    /// Inserts the stock accounts when absent; returns how many were added.
    pub fn seed_default_users(&self) -> Result<usize> {
        let defaults: [(&str, &str, &str, &str, Role); 4] = [
            ("admin", "admin123", "Administrator", "admin@example.com", Role::Admin),
            ("user1", "user123", "User One", "user1@example.com", Role::Staff),
            ("staff1", "staff123", "Staff One", "staff1@example.com", Role::Staff),
            ("staff2", "staff123", "Staff Two", "staff2@example.com", Role::Staff),
        ];

        let mut added = 0;
        for (username, credential, display_name, email, role) in defaults {
            if self.user_by_username(username)?.is_none() {
                self.insert_user(username, credential, display_name, email, role)?;
                added += 1;
            }
        }
        Ok(added)
    }

    // =========================================================================
    // Requirement reads
    // =========================================================================

    /// Looks up one ticket with joined names. Soft-deleted rows are only
    /// returned when `include_deleted` is set.
    pub fn ticket_by_id(&self, id: i64, include_deleted: bool) -> Result<Option<Ticket>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {REQ_COLUMNS}, ar.display_name, ae.display_name
             FROM requirements r {NAME_JOINS}
             WHERE r.id = ?1 AND (?2 OR r.is_deleted = 0)"
        );
        let row = conn
            .query_row(&sql, params![id, include_deleted], map_ticket_row)
            .optional()?;
        row.map(TicketRow::into_ticket).transpose()
    }

    /// Dispatched, non-deleted tickets assigned to `assignee_id`, newest
    /// first, optionally filtered by status.
    pub fn tickets_for_assignee(
        &self,
        assignee_id: i64,
        status: Option<Status>,
    ) -> Result<Vec<Ticket>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {REQ_COLUMNS}, ar.display_name, ae.display_name
             FROM requirements r {NAME_JOINS}
             WHERE r.assignee_id = ?1 AND r.is_dispatched = 1 AND r.is_deleted = 0
               AND (?2 IS NULL OR r.status = ?2)
             ORDER BY r.created_at DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![assignee_id, status.map(|s| s.as_str())],
            map_ticket_row,
        )?;
        collect_tickets(rows)
    }

    /// Dispatched, non-deleted tickets issued by `assigner_id`, newest
    /// first, optionally narrowed to one assignee and/or status.
    pub fn tickets_dispatched_by(
        &self,
        assigner_id: i64,
        assignee_id: Option<i64>,
        status: Option<Status>,
    ) -> Result<Vec<Ticket>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {REQ_COLUMNS}, ar.display_name, ae.display_name
             FROM requirements r {NAME_JOINS}
             WHERE r.assigner_id = ?1 AND r.is_dispatched = 1 AND r.is_deleted = 0
               AND (?2 IS NULL OR r.assignee_id = ?2)
               AND (?3 IS NULL OR r.status = ?3)
             ORDER BY r.created_at DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![assigner_id, assignee_id, status.map(|s| s.as_str())],
            map_ticket_row,
        )?;
        collect_tickets(rows)
    }

    /// Not-yet-dispatched tickets issued by `assigner_id`, soonest trigger
    /// first, optionally narrowed to one assignee.
    pub fn tickets_scheduled_by(
        &self,
        assigner_id: i64,
        assignee_id: Option<i64>,
    ) -> Result<Vec<Ticket>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {REQ_COLUMNS}, ar.display_name, ae.display_name
             FROM requirements r {NAME_JOINS}
             WHERE r.assigner_id = ?1 AND r.is_dispatched = 0
               AND (?2 IS NULL OR r.assignee_id = ?2)
             ORDER BY r.scheduled_time ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![assigner_id, assignee_id], map_ticket_row)?;
        collect_tickets(rows)
    }

    /// Trash: soft-deleted tickets issued by `assigner_id`, most recently
    /// deleted first.
    pub fn tickets_deleted_by(&self, assigner_id: i64) -> Result<Vec<Ticket>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {REQ_COLUMNS}, ar.display_name, ae.display_name
             FROM requirements r {NAME_JOINS}
             WHERE r.assigner_id = ?1 AND r.is_deleted = 1
             ORDER BY r.deleted_at DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![assigner_id], map_ticket_row)?;
        collect_tickets(rows)
    }

    // =========================================================================
    // Lifecycle writes (engine only)
    // =========================================================================

    pub(crate) fn insert_requirement(
        &self,
        new: &NewRequirement,
        assigner_id: i64,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();

        // A scheduled ticket is inert: not dispatched, no created_at until
        // the trigger fires.
        let (status, is_dispatched, created_at) = match new.scheduled_time {
            Some(_) => (Status::NotDispatched, false, None),
            None => (Status::Pending, true, Some(fmt_ts(now))),
        };

        conn.execute(
            "INSERT INTO requirements
             (title, description, assigner_id, assignee_id, status, priority,
              created_at, scheduled_time, is_dispatched)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                new.title,
                new.description,
                assigner_id,
                new.assignee_id,
                status.as_str(),
                new.priority.as_str(),
                created_at,
                new.scheduled_time.map(fmt_ts),
                is_dispatched,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Promotes every due scheduled ticket in one statement. `created_at`
    /// becomes the dispatch moment; the original creation instant is not
    /// retained.
    pub(crate) fn promote_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE requirements
             SET is_dispatched = 1, status = 'pending', created_at = ?1
             WHERE is_dispatched = 0 AND scheduled_time <= ?1",
            params![fmt_ts(now)],
        )?;
        Ok(count)
    }

    /// Hard-deletes a ticket that never left the scheduled state.
    pub(crate) fn delete_scheduled(&self, id: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute(
            "DELETE FROM requirements WHERE id = ?1 AND is_dispatched = 0",
            params![id],
        )?)
    }

    pub(crate) fn mark_reviewing(
        &self,
        id: i64,
        comment: &str,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute(
            "UPDATE requirements
             SET status = 'reviewing', comment = ?2, completed_at = ?3
             WHERE id = ?1 AND status = 'pending' AND is_deleted = 0",
            params![id, comment, fmt_ts(now)],
        )?)
    }

    pub(crate) fn mark_completed(&self, id: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute(
            "UPDATE requirements
             SET status = 'completed'
             WHERE id = ?1 AND status = 'reviewing' AND is_deleted = 0",
            params![id],
        )?)
    }

    /// Rejection sends the ticket back to pending and clears the
    /// submission fields so the assignee can submit again.
    pub(crate) fn mark_rejected(&self, id: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute(
            "UPDATE requirements
             SET status = 'pending', comment = NULL, completed_at = NULL
             WHERE id = ?1 AND status = 'reviewing' AND is_deleted = 0",
            params![id],
        )?)
    }

    pub(crate) fn mark_invalid(&self, id: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute(
            "UPDATE requirements
             SET status = 'invalid'
             WHERE id = ?1 AND status IN ('pending', 'reviewing', 'completed')
               AND is_deleted = 0",
            params![id],
        )?)
    }

    pub(crate) fn mark_deleted(&self, id: i64, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute(
            "UPDATE requirements
             SET is_deleted = 1, deleted_at = ?2
             WHERE id = ?1 AND is_deleted = 0",
            params![id, fmt_ts(now)],
        )?)
    }

    /// Restore leaves status, dispatch state and scheduled time exactly as
    /// they were before deletion.
    pub(crate) fn mark_restored(&self, id: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute(
            "UPDATE requirements
             SET is_deleted = 0, deleted_at = NULL
             WHERE id = ?1 AND is_deleted = 1",
            params![id],
        )?)
    }

    /// Maintenance escape hatch: physically removes every requirement.
    pub(crate) fn purge_requirements(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute("DELETE FROM requirements", [])?)
    }
}

// =============================================================================
// Row mapping
// =============================================================================

/// Raw user row; strings become typed values in a second step so a bad
/// role in storage surfaces as an error instead of a guessed default.
struct UserRow {
    id: i64,
    username: String,
    credential: String,
    display_name: String,
    email: String,
    role: String,
}

fn map_user_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        credential: row.get(2)?,
        display_name: row.get(3)?,
        email: row.get(4)?,
        role: row.get(5)?,
    })
}

impl UserRow {
    fn into_user(self) -> Result<User> {
        Ok(User {
            id: self.id,
            username: self.username,
            credential: self.credential,
            display_name: self.display_name,
            email: self.email,
            role: self.role.parse()?,
        })
    }
}

/// Raw requirement row plus the joined display names.
struct TicketRow {
    id: i64,
    title: String,
    description: String,
    assigner_id: i64,
    assignee_id: i64,
    status: String,
    priority: String,
    created_at: Option<String>,
    scheduled_time: Option<String>,
    is_dispatched: bool,
    completed_at: Option<String>,
    comment: Option<String>,
    is_deleted: bool,
    deleted_at: Option<String>,
    assigner_name: String,
    assignee_name: String,
}

fn map_ticket_row(row: &Row<'_>) -> rusqlite::Result<TicketRow> {
    Ok(TicketRow {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        assigner_id: row.get(3)?,
        assignee_id: row.get(4)?,
        status: row.get(5)?,
        priority: row.get(6)?,
        created_at: row.get(7)?,
        scheduled_time: row.get(8)?,
        is_dispatched: row.get(9)?,
        completed_at: row.get(10)?,
        comment: row.get(11)?,
        is_deleted: row.get(12)?,
        deleted_at: row.get(13)?,
        assigner_name: row.get(14)?,
        assignee_name: row.get(15)?,
    })
}

impl TicketRow {
    fn into_ticket(self) -> Result<Ticket> {
        Ok(Ticket {
            requirement: Requirement {
                id: self.id,
                title: self.title,
                description: self.description,
                assigner_id: self.assigner_id,
                assignee_id: self.assignee_id,
                status: self.status.parse()?,
                priority: self.priority.parse()?,
                created_at: parse_opt_ts(self.created_at)?,
                scheduled_time: parse_opt_ts(self.scheduled_time)?,
                is_dispatched: self.is_dispatched,
                completed_at: parse_opt_ts(self.completed_at)?,
                comment: self.comment,
                is_deleted: self.is_deleted,
                deleted_at: parse_opt_ts(self.deleted_at)?,
            },
            assigner_name: self.assigner_name,
            assignee_name: self.assignee_name,
        })
    }
}

fn collect_tickets(
    rows: impl Iterator<Item = rusqlite::Result<TicketRow>>,
) -> Result<Vec<Ticket>> {
    let mut tickets = Vec::new();
    for row in rows {
        tickets.push(row?.into_ticket()?);
    }
    Ok(tickets)
}

// =============================================================================
// Timestamps
// =============================================================================

/// UTC, RFC 3339, second precision. The fixed width keeps SQL string
/// comparison chronological, which `promote_due` relies on.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Validation(format!("invalid timestamp '{}': {}", raw, e)))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;
    use chrono::Duration;
    use tempfile::TempDir;

    fn new_requirement(assignee_id: i64) -> NewRequirement {
        NewRequirement {
            title: "Test".to_string(),
            description: "Test description".to_string(),
            assignee_id,
            priority: Priority::Normal,
            scheduled_time: None,
        }
    }

    #[test]
    fn test_open_creates_schema() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("reqmgr.db")).unwrap();
        assert!(db.list_users(None).unwrap().is_empty());
    }

    #[test]
    fn test_seed_default_users_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.seed_default_users().unwrap(), 4);
        assert_eq!(db.seed_default_users().unwrap(), 0);

        let admin = db.user_by_username("admin").unwrap().unwrap();
        assert_eq!(admin.role, Role::Admin);
        assert_eq!(db.list_staff().unwrap().len(), 3);
    }

    #[test]
    fn test_insert_user_rejects_duplicate_username() {
        let db = Database::open_in_memory().unwrap();
        db.insert_user("alice", "pw", "Alice", "alice@example.com", Role::Staff)
            .unwrap();
        let err = db
            .insert_user("alice", "pw2", "Alice B", "b@example.com", Role::Staff)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_ticket_round_trip_with_joined_names() {
        let db = Database::open_in_memory().unwrap();
        let admin = db
            .insert_user("boss", "pw", "The Boss", "boss@example.com", Role::Admin)
            .unwrap();
        let staff = db
            .insert_user("worker", "pw", "The Worker", "w@example.com", Role::Staff)
            .unwrap();

        let id = db
            .insert_requirement(&new_requirement(staff), admin, Utc::now())
            .unwrap();

        let ticket = db.ticket_by_id(id, false).unwrap().unwrap();
        assert_eq!(ticket.requirement.status, Status::Pending);
        assert!(ticket.requirement.is_dispatched);
        assert!(ticket.requirement.created_at.is_some());
        assert_eq!(ticket.assigner_name, "The Boss");
        assert_eq!(ticket.assignee_name, "The Worker");
    }

    #[test]
    fn test_promote_due_only_touches_due_rows() {
        let db = Database::open_in_memory().unwrap();
        let admin = db
            .insert_user("boss", "pw", "Boss", "b@example.com", Role::Admin)
            .unwrap();
        let staff = db
            .insert_user("worker", "pw", "Worker", "w@example.com", Role::Staff)
            .unwrap();

        let now = Utc::now();
        let mut due = new_requirement(staff);
        due.scheduled_time = Some(now + Duration::minutes(5));
        let due_id = db.insert_requirement(&due, admin, now).unwrap();

        let mut later = new_requirement(staff);
        later.scheduled_time = Some(now + Duration::hours(2));
        let later_id = db.insert_requirement(&later, admin, now).unwrap();

        let dispatch_at = now + Duration::minutes(30);
        assert_eq!(db.promote_due(dispatch_at).unwrap(), 1);

        let promoted = db.ticket_by_id(due_id, false).unwrap().unwrap();
        assert_eq!(promoted.requirement.status, Status::Pending);
        assert!(promoted.requirement.is_dispatched);
        assert_eq!(
            promoted.requirement.created_at.unwrap(),
            parse_ts(&fmt_ts(dispatch_at)).unwrap()
        );

        let waiting = db.ticket_by_id(later_id, false).unwrap().unwrap();
        assert_eq!(waiting.requirement.status, Status::NotDispatched);
        assert!(!waiting.requirement.is_dispatched);
    }

    #[test]
    fn test_v1_database_is_upgraded_in_place() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old.db");

        // Lay down a version-1 database: no review or trash columns.
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE schema_version (version INTEGER NOT NULL);
                 INSERT INTO schema_version (version) VALUES (1);
                 CREATE TABLE users (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     username TEXT UNIQUE NOT NULL,
                     credential TEXT NOT NULL,
                     display_name TEXT NOT NULL,
                     email TEXT NOT NULL,
                     role TEXT NOT NULL DEFAULT 'staff'
                 );
                 CREATE TABLE requirements (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     title TEXT NOT NULL,
                     description TEXT NOT NULL,
                     assigner_id INTEGER NOT NULL,
                     assignee_id INTEGER NOT NULL,
                     status TEXT NOT NULL DEFAULT 'pending',
                     priority TEXT NOT NULL DEFAULT 'normal',
                     created_at TEXT,
                     scheduled_time TEXT,
                     is_dispatched INTEGER NOT NULL DEFAULT 1
                 );",
            )
            .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let admin = db
            .insert_user("boss", "pw", "Boss", "b@example.com", Role::Admin)
            .unwrap();
        let staff = db
            .insert_user("worker", "pw", "Worker", "w@example.com", Role::Staff)
            .unwrap();
        let id = db
            .insert_requirement(&new_requirement(staff), admin, Utc::now())
            .unwrap();

        // The upgraded columns are live: soft delete works.
        assert_eq!(db.mark_deleted(id, Utc::now()).unwrap(), 1);
        assert!(db.ticket_by_id(id, false).unwrap().is_none());
        assert!(db.ticket_by_id(id, true).unwrap().is_some());
    }

    #[test]
    fn test_timestamp_format_sorts_lexicographically() {
        let early = Utc::now();
        let late = early + Duration::seconds(90);
        assert!(fmt_ts(early) < fmt_ts(late));
        assert_eq!(parse_ts(&fmt_ts(early)).unwrap(), parse_ts(&fmt_ts(early)).unwrap());
    }
}
