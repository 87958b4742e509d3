//! Authentication and account registration.
//!
//! The core only needs "username/password in, identity out"; how the
//! credential is stored is a pluggable concern behind [`PasswordScheme`].

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{Identity, Role};

/// How credentials are written to and checked against the store.
pub trait PasswordScheme: Send + Sync {
    /// Produces the stored form of a new password.
    fn protect(&self, password: &str) -> String;

    /// Checks a presented password against the stored form.
    fn verify(&self, password: &str, stored: &str) -> bool;
}

/// Stores passwords verbatim. This is the scheme the legacy database
/// uses; deployments wanting hashing implement [`PasswordScheme`] over
/// their preferred algorithm and migrate the column.
pub struct PlainText;

impl PasswordScheme for PlainText {
    fn protect(&self, password: &str) -> String {
        password.to_string()
    }

    fn verify(&self, password: &str, stored: &str) -> bool {
        password == stored
    }
}

/// Input for registering a new account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub display_name: String,
    pub email: String,
    pub role: Role,
}

/// Verifies a username/password pair and returns the caller identity.
///
/// A missing user and a wrong password produce the same message so the
/// login prompt does not reveal which usernames exist.
pub fn authenticate(
    db: &Database,
    scheme: &dyn PasswordScheme,
    username: &str,
    password: &str,
) -> Result<Identity> {
    let rejected = || Error::permission("invalid username or password");

    let user = db.user_by_username(username)?.ok_or_else(rejected)?;
    if !scheme.verify(password, &user.credential) {
        return Err(rejected());
    }
    Ok(user.into())
}

/// Registers a new account after validating every field. Returns the new
/// user id.
pub fn register_user(db: &Database, scheme: &dyn PasswordScheme, new: &NewUser) -> Result<i64> {
    if new.username.trim().is_empty() {
        return Err(Error::validation("username must not be empty"));
    }
    if new.password.len() < 6 {
        return Err(Error::validation(
            "password must be at least 6 characters",
        ));
    }
    if new.display_name.trim().is_empty() {
        return Err(Error::validation("display name must not be empty"));
    }
    if !is_valid_email(&new.email) {
        return Err(Error::validation(format!(
            "'{}' is not a valid email address",
            new.email
        )));
    }

    db.insert_user(
        new.username.trim(),
        &scheme.protect(&new.password),
        new.display_name.trim(),
        new.email.trim(),
        new.role,
    )
}

/// Local-part @ domain with at least one dot in the domain; no spaces.
fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.contains(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_user() -> Database {
        let db = Database::open_in_memory().unwrap();
        register_user(
            &db,
            &PlainText,
            &NewUser {
                username: "alice".to_string(),
                password: "secret1".to_string(),
                display_name: "Alice".to_string(),
                email: "alice@example.com".to_string(),
                role: Role::Staff,
            },
        )
        .unwrap();
        db
    }

    #[test]
    fn test_authenticate_success() {
        let db = db_with_user();
        let identity = authenticate(&db, &PlainText, "alice", "secret1").unwrap();
        assert_eq!(identity.username, "alice");
        assert_eq!(identity.role, Role::Staff);
    }

    #[test]
    fn test_authenticate_failure_does_not_reveal_which_part_was_wrong() {
        let db = db_with_user();

        let bad_user = authenticate(&db, &PlainText, "bob", "secret1").unwrap_err();
        let bad_pass = authenticate(&db, &PlainText, "alice", "wrong").unwrap_err();

        assert_eq!(bad_user.to_string(), bad_pass.to_string());
    }

    #[test]
    fn test_register_user_validates_fields() {
        let db = Database::open_in_memory().unwrap();
        let base = NewUser {
            username: "bob".to_string(),
            password: "secret1".to_string(),
            display_name: "Bob".to_string(),
            email: "bob@example.com".to_string(),
            role: Role::Staff,
        };

        let mut short_password = base.clone();
        short_password.password = "abc".to_string();
        assert!(matches!(
            register_user(&db, &PlainText, &short_password).unwrap_err(),
            Error::Validation(_)
        ));

        let mut bad_email = base.clone();
        bad_email.email = "not-an-address".to_string();
        assert!(matches!(
            register_user(&db, &PlainText, &bad_email).unwrap_err(),
            Error::Validation(_)
        ));

        let mut blank_name = base.clone();
        blank_name.display_name = " ".to_string();
        assert!(matches!(
            register_user(&db, &PlainText, &blank_name).unwrap_err(),
            Error::Validation(_)
        ));

        register_user(&db, &PlainText, &base).unwrap();

        // Duplicate usernames are refused by the store.
        assert!(matches!(
            register_user(&db, &PlainText, &base).unwrap_err(),
            Error::Validation(_)
        ));
    }

    #[test]
    fn test_email_shapes() {
        assert!(is_valid_email("a@b.co"));
        assert!(is_valid_email("first.last+tag@sub.domain.org"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("@b.co"));
        assert!(!is_valid_email("a b@c.co"));
        assert!(!is_valid_email("a@.co"));
        assert!(!is_valid_email("plain"));
    }
}
