//! Lifecycle engine: the requirement state machine.
//!
//! Every operation checks the caller's permission against one declarative
//! predicate, then applies its transition as a single conditional store
//! write. Zero affected rows means the precondition no longer held and the
//! record was left untouched.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{Identity, NewRequirement, Requirement, Status, Ticket};

/// Operations a caller can attempt, used by [`authorize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Create,
    CancelScheduled,
    Submit,
    Approve,
    Reject,
    Invalidate,
    Delete,
    Restore,
    PurgeAll,
    ListDispatched,
    ListScheduled,
    ListTrash,
}

/// Who may perform an action.
enum Scope {
    /// Requires the admin role.
    Admin,
    /// Requires the caller to be the ticket's assignee.
    Assignee,
    /// Requires the caller to be the ticket's recorded assigner; the admin
    /// role alone is not sufficient.
    Assigner,
}

impl Action {
    fn scope(self) -> Scope {
        match self {
            Action::Create
            | Action::PurgeAll
            | Action::ListDispatched
            | Action::ListScheduled
            | Action::ListTrash => Scope::Admin,
            Action::Submit => Scope::Assignee,
            Action::CancelScheduled
            | Action::Approve
            | Action::Reject
            | Action::Invalidate
            | Action::Delete
            | Action::Restore => Scope::Assigner,
        }
    }

    fn verb(self) -> &'static str {
        match self {
            Action::Create => "create requirements",
            Action::CancelScheduled => "cancel this scheduled requirement",
            Action::Submit => "submit this requirement",
            Action::Approve => "approve this requirement",
            Action::Reject => "reject this requirement",
            Action::Invalidate => "invalidate this requirement",
            Action::Delete => "delete this requirement",
            Action::Restore => "restore this requirement",
            Action::PurgeAll => "purge all requirements",
            Action::ListDispatched => "list dispatched requirements",
            Action::ListScheduled => "list scheduled requirements",
            Action::ListTrash => "list deleted requirements",
        }
    }
}

/// The single permission predicate every operation goes through.
///
/// The fields it reads (`assigner_id`, `assignee_id`) are immutable after
/// creation, so checking them on a pre-read cannot race with the
/// conditional write that follows.
fn authorize(caller: &Identity, action: Action, ticket: Option<&Requirement>) -> Result<()> {
    let allowed = match action.scope() {
        Scope::Admin => caller.is_admin(),
        Scope::Assignee => ticket.is_some_and(|t| t.assignee_id == caller.id),
        Scope::Assigner => ticket.is_some_and(|t| t.assigner_id == caller.id),
    };

    if allowed {
        Ok(())
    } else {
        Err(Error::permission(format!(
            "{} is not allowed to {}",
            caller.username,
            action.verb()
        )))
    }
}

/// The lifecycle engine. Cheap to clone; clones share the database.
#[derive(Clone)]
pub struct Engine {
    db: Arc<Database>,
}

impl Engine {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Creates a requirement, dispatching it immediately or scheduling it
    /// for later. Returns the new ticket id.
    pub fn create(&self, caller: &Identity, new: NewRequirement) -> Result<i64> {
        self.create_at(caller, new, Utc::now())
    }

    fn create_at(&self, caller: &Identity, new: NewRequirement, now: DateTime<Utc>) -> Result<i64> {
        authorize(caller, Action::Create, None)?;

        if new.title.trim().is_empty() {
            return Err(Error::validation("title must not be empty"));
        }
        if new.description.trim().is_empty() {
            return Err(Error::validation("description must not be empty"));
        }
        if self.db.user_by_id(new.assignee_id)?.is_none() {
            return Err(Error::validation(format!(
                "unknown assignee id {}",
                new.assignee_id
            )));
        }
        if let Some(at) = new.scheduled_time {
            if at <= now {
                return Err(Error::validation(
                    "scheduled time must be strictly in the future",
                ));
            }
        }

        self.db.insert_requirement(&new, caller.id, now)
    }

    /// Promotes every scheduled ticket whose trigger time has passed.
    /// Invoked by the dispatch scheduler; takes no caller.
    pub fn dispatch_due(&self) -> Result<usize> {
        self.dispatch_due_at(Utc::now())
    }

    /// Like [`Engine::dispatch_due`] with an explicit clock, for callers
    /// that control time (tests, backfills).
    pub fn dispatch_due_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let count = self.db.promote_due(now)?;
        if count > 0 {
            log::info!("dispatched {} scheduled requirement(s)", count);
        }
        Ok(count)
    }

    /// Hard-deletes a ticket that has not been dispatched yet.
    pub fn cancel_scheduled(&self, caller: &Identity, id: i64) -> Result<()> {
        let ticket = self.load(id, false)?;
        authorize(caller, Action::CancelScheduled, Some(&ticket.requirement))?;

        if self.db.delete_scheduled(id)? == 0 {
            return Err(Error::transition(format!(
                "requirement {} has already been dispatched",
                id
            )));
        }
        Ok(())
    }

    /// The assignee hands in a completion note; the ticket moves to
    /// reviewing.
    pub fn submit(&self, caller: &Identity, id: i64, comment: &str) -> Result<()> {
        if comment.trim().is_empty() {
            return Err(Error::validation("completion note must not be empty"));
        }

        let ticket = self.load(id, false)?;
        authorize(caller, Action::Submit, Some(&ticket.requirement))?;

        if self.db.mark_reviewing(id, comment, Utc::now())? == 0 {
            return Err(Error::transition(format!(
                "requirement {} is not pending",
                id
            )));
        }
        Ok(())
    }

    /// The assigner accepts the submission; terminal for this path.
    pub fn approve(&self, caller: &Identity, id: i64) -> Result<()> {
        let ticket = self.load(id, false)?;
        authorize(caller, Action::Approve, Some(&ticket.requirement))?;

        if self.db.mark_completed(id)? == 0 {
            return Err(Error::transition(format!(
                "requirement {} is not under review",
                id
            )));
        }
        Ok(())
    }

    /// The assigner sends the ticket back; the completion note and
    /// timestamp are cleared so the assignee can submit again.
    pub fn reject(&self, caller: &Identity, id: i64) -> Result<()> {
        let ticket = self.load(id, false)?;
        authorize(caller, Action::Reject, Some(&ticket.requirement))?;

        if self.db.mark_rejected(id)? == 0 {
            return Err(Error::transition(format!(
                "requirement {} is not under review",
                id
            )));
        }
        Ok(())
    }

    /// Voids a dispatched ticket. One-way.
    pub fn invalidate(&self, caller: &Identity, id: i64) -> Result<()> {
        let ticket = self.load(id, false)?;
        authorize(caller, Action::Invalidate, Some(&ticket.requirement))?;

        if self.db.mark_invalid(id)? == 0 {
            return Err(Error::transition(format!(
                "requirement {} cannot be invalidated in its current state",
                id
            )));
        }
        Ok(())
    }

    /// Moves a ticket to the trash. Reversible via [`Engine::restore`].
    pub fn delete(&self, caller: &Identity, id: i64) -> Result<()> {
        let ticket = self.load(id, false)?;
        authorize(caller, Action::Delete, Some(&ticket.requirement))?;

        if self.db.mark_deleted(id, Utc::now())? == 0 {
            return Err(Error::transition(format!(
                "requirement {} is already deleted",
                id
            )));
        }
        Ok(())
    }

    /// Takes a ticket out of the trash, back into its prior state.
    pub fn restore(&self, caller: &Identity, id: i64) -> Result<()> {
        let ticket = self.load(id, true)?;
        authorize(caller, Action::Restore, Some(&ticket.requirement))?;

        if self.db.mark_restored(id)? == 0 {
            return Err(Error::transition(format!(
                "requirement {} is not in the trash",
                id
            )));
        }
        Ok(())
    }

    /// Maintenance escape hatch: physically removes every requirement.
    /// Returns how many rows were wiped.
    pub fn purge_all(&self, caller: &Identity) -> Result<usize> {
        authorize(caller, Action::PurgeAll, None)?;
        self.db.purge_requirements()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// The caller's own work queue: dispatched, non-deleted tickets.
    pub fn list_for_assignee(
        &self,
        caller: &Identity,
        status: Option<Status>,
    ) -> Result<Vec<Ticket>> {
        self.db.tickets_for_assignee(caller.id, status)
    }

    /// Tickets the caller has dispatched, optionally narrowed to one
    /// assignee and/or status.
    pub fn list_dispatched_for_assigner(
        &self,
        caller: &Identity,
        assignee_id: Option<i64>,
        status: Option<Status>,
    ) -> Result<Vec<Ticket>> {
        authorize(caller, Action::ListDispatched, None)?;
        self.db.tickets_dispatched_by(caller.id, assignee_id, status)
    }

    /// The caller's scheduled (not yet dispatched) tickets.
    pub fn list_scheduled_for_assigner(
        &self,
        caller: &Identity,
        assignee_id: Option<i64>,
    ) -> Result<Vec<Ticket>> {
        authorize(caller, Action::ListScheduled, None)?;
        self.db.tickets_scheduled_by(caller.id, assignee_id)
    }

    /// The caller's trash.
    pub fn list_deleted_for_assigner(&self, caller: &Identity) -> Result<Vec<Ticket>> {
        authorize(caller, Action::ListTrash, None)?;
        self.db.tickets_deleted_by(caller.id)
    }

    /// Detail view, restricted to the ticket's participants. Deleted and
    /// scheduled tickets stay visible to the assigner only.
    pub fn ticket(&self, caller: &Identity, id: i64) -> Result<Ticket> {
        let ticket = self.load(id, true)?;
        let req = &ticket.requirement;

        if (req.is_deleted || !req.is_dispatched) && req.assigner_id != caller.id {
            return Err(Error::not_found(format!("requirement {}", id)));
        }
        if req.assigner_id != caller.id && req.assignee_id != caller.id {
            return Err(Error::permission(format!(
                "{} is not a participant of requirement {}",
                caller.username, id
            )));
        }
        Ok(ticket)
    }

    fn load(&self, id: i64, include_deleted: bool) -> Result<Ticket> {
        self.db
            .ticket_by_id(id, include_deleted)?
            .ok_or_else(|| Error::not_found(format!("requirement {}", id)))
    }
}
