use anyhow::Result;
use inquire::{Confirm, Password, PasswordDisplayMode, Text};

/// Prompts for a username when it was not passed on the command line.
pub fn prompt_username() -> Result<String> {
    Ok(Text::new("Username:").prompt()?)
}

/// Prompts for a password without echoing it.
pub fn prompt_password() -> Result<String> {
    Ok(Password::new("Password:")
        .with_display_mode(PasswordDisplayMode::Masked)
        .without_confirmation()
        .prompt()?)
}

/// Prompts for a new account password, asking twice.
pub fn prompt_new_password() -> Result<String> {
    Ok(Password::new("Password:")
        .with_display_mode(PasswordDisplayMode::Masked)
        .prompt()?)
}

/// Prompts for the completion note of a submission.
pub fn prompt_completion_note() -> Result<String> {
    Ok(Text::new("Completion note:").prompt()?)
}

/// Asks before destructive maintenance.
pub fn confirm(message: &str) -> Result<bool> {
    Ok(Confirm::new(message).with_default(false).prompt()?)
}
