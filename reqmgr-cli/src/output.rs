//! Output rendering: table, JSON, CSV, and colored status lines.

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use clap::ValueEnum;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use reqmgr_core::{Ticket, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Table
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Table => f.write_str("table"),
            OutputFormat::Json => f.write_str("json"),
            OutputFormat::Csv => f.write_str("csv"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(format!("unknown output format '{}'", other)),
        }
    }
}

pub fn success(message: &str) {
    println!("{}", message.green());
}

pub fn error(message: &str) {
    eprintln!("{}", message.red());
}

pub fn warning(message: &str) {
    println!("{}", message.yellow());
}

/// Renders a listing. Table and CSV use the prepared rows; JSON
/// serializes the typed records directly.
pub fn render<T: Serialize>(
    format: OutputFormat,
    headers: &[&str],
    rows: &[Vec<String>],
    records: &T,
) -> Result<()> {
    match format {
        OutputFormat::Table => render_table(headers, rows),
        OutputFormat::Csv => render_csv(headers, rows),
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(records)?);
        }
    }
    Ok(())
}

fn render_table(headers: &[&str], rows: &[Vec<String>]) {
    if rows.is_empty() {
        println!("No entries.");
        return;
    }

    let columns = headers
        .len()
        .max(rows.iter().map(|r| r.len()).max().unwrap_or(0));
    let mut widths = vec![0usize; columns];
    for (i, header) in headers.iter().enumerate() {
        widths[i] = header.chars().count();
    }
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let line = |cells: &[String]| {
        let padded: Vec<String> = cells
            .iter()
            .enumerate()
            .map(|(i, cell)| format!("{:<width$}", cell, width = widths[i]))
            .collect();
        println!("{}", padded.join("  ").trim_end());
    };

    if !headers.is_empty() {
        line(&headers.iter().map(|h| h.to_string()).collect::<Vec<_>>());
        let total: usize = widths.iter().sum::<usize>() + 2 * (widths.len().saturating_sub(1));
        println!("{}", "-".repeat(total));
    }
    for row in rows {
        line(row);
    }
    println!("\nTotal: {}", rows.len());
}

fn render_csv(headers: &[&str], rows: &[Vec<String>]) {
    println!(
        "{}",
        headers
            .iter()
            .map(|h| csv_escape(h))
            .collect::<Vec<_>>()
            .join(",")
    );
    for row in rows {
        println!(
            "{}",
            row.iter()
                .map(|c| csv_escape(c))
                .collect::<Vec<_>>()
                .join(",")
        );
    }
}

fn csv_escape(cell: &str) -> String {
    if cell.contains(',') || cell.contains('"') || cell.contains('\n') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

fn local_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

fn opt_time(ts: Option<DateTime<Utc>>) -> String {
    ts.map(local_time).unwrap_or_default()
}

/// Columns for a dispatched-ticket listing (queue or dispatched-by view).
pub const TICKET_HEADERS: [&str; 7] =
    ["ID", "Title", "Status", "Priority", "Created", "Assigner", "Assignee"];

pub fn ticket_rows(tickets: &[Ticket]) -> Vec<Vec<String>> {
    tickets
        .iter()
        .map(|t| {
            vec![
                t.requirement.id.to_string(),
                t.requirement.title.clone(),
                t.requirement.status.to_string(),
                t.requirement.priority.to_string(),
                opt_time(t.requirement.created_at),
                t.assigner_name.clone(),
                t.assignee_name.clone(),
            ]
        })
        .collect()
}

/// Columns for the scheduled-ticket listing.
pub const SCHEDULED_HEADERS: [&str; 5] = ["ID", "Title", "Priority", "Scheduled", "Assignee"];

pub fn scheduled_rows(tickets: &[Ticket]) -> Vec<Vec<String>> {
    tickets
        .iter()
        .map(|t| {
            vec![
                t.requirement.id.to_string(),
                t.requirement.title.clone(),
                t.requirement.priority.to_string(),
                opt_time(t.requirement.scheduled_time),
                t.assignee_name.clone(),
            ]
        })
        .collect()
}

/// Columns for the trash listing.
pub const TRASH_HEADERS: [&str; 5] = ["ID", "Title", "Status", "Deleted", "Assignee"];

pub fn trash_rows(tickets: &[Ticket]) -> Vec<Vec<String>> {
    tickets
        .iter()
        .map(|t| {
            vec![
                t.requirement.id.to_string(),
                t.requirement.title.clone(),
                t.requirement.status.to_string(),
                opt_time(t.requirement.deleted_at),
                t.assignee_name.clone(),
            ]
        })
        .collect()
}

pub const USER_HEADERS: [&str; 5] = ["ID", "Username", "Name", "Email", "Role"];

pub fn user_rows(users: &[User]) -> Vec<Vec<String>> {
    users
        .iter()
        .map(|u| {
            vec![
                u.id.to_string(),
                u.username.clone(),
                u.display_name.clone(),
                u.email.clone(),
                u.role.to_string(),
            ]
        })
        .collect()
}

/// Full single-ticket view as key/value lines (table format only; JSON
/// callers serialize the ticket itself).
pub fn print_ticket_detail(ticket: &Ticket) {
    let r = &ticket.requirement;
    println!("{:<12} {}", "ID:", r.id);
    println!("{:<12} {}", "Title:", r.title);
    println!("{:<12} {}", "Description:", r.description);
    println!("{:<12} {}", "Status:", r.status);
    println!("{:<12} {}", "Priority:", r.priority);
    println!("{:<12} {}", "Assigner:", ticket.assigner_name);
    println!("{:<12} {}", "Assignee:", ticket.assignee_name);
    println!("{:<12} {}", "Created:", opt_time(r.created_at));
    if let Some(at) = r.scheduled_time {
        println!("{:<12} {}", "Scheduled:", local_time(at));
    }
    if let Some(comment) = &r.comment {
        println!("{:<12} {}", "Note:", comment);
        println!("{:<12} {}", "Submitted:", opt_time(r.completed_at));
    }
    if r.is_deleted {
        println!("{:<12} {}", "Deleted:", opt_time(r.deleted_at));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parse() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_csv_escaping_rules() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
