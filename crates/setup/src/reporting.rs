//! Terraform-style resource plan output for the `setup` subcommand.
//! Grounded on the Python original's `setup/reporting.py`, with
//! `colored` standing in for its hand-rolled ANSI `colors.py`.

use colored::Colorize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Mailbox,
    Label,
    ContactGroup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceStatus {
    Exists,
    Create,
    Created,
    Failed,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ResourceAction {
    pub kind: ResourceKind,
    pub name: String,
    pub status: ResourceStatus,
    pub error: Option<String>,
}

impl ResourceAction {
    pub fn exists(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self { kind, name: name.into(), status: ResourceStatus::Exists, error: None }
    }

    pub fn to_create(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self { kind, name: name.into(), status: ResourceStatus::Create, error: None }
    }

    pub fn created(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self { kind, name: name.into(), status: ResourceStatus::Created, error: None }
    }

    pub fn failed(kind: ResourceKind, name: impl Into<String>, error: impl Into<String>) -> Self {
        Self { kind, name: name.into(), status: ResourceStatus::Failed, error: Some(error.into()) }
    }
}

fn symbol(status: ResourceStatus) -> colored::ColoredString {
    match status {
        ResourceStatus::Exists => "\u{2713}".dimmed(),
        ResourceStatus::Create => "+".yellow(),
        ResourceStatus::Created => "\u{2713}".green(),
        ResourceStatus::Failed => "\u{2717}".red(),
        ResourceStatus::Skipped => "\u{229a}".dimmed(),
    }
}

fn status_text(action: &ResourceAction) -> String {
    match action.status {
        ResourceStatus::Failed => {
            format!("{}", format!("FAILED: {}", action.error.as_deref().unwrap_or("unknown error")).red())
        }
        ResourceStatus::Skipped => {
            format!("{}", "skipped".dimmed())
        }
        ResourceStatus::Exists => format!("{}", "exists".dimmed()),
        ResourceStatus::Create => format!("{}", "create".yellow()),
        ResourceStatus::Created => format!("{}", "created".green()),
    }
}

fn print_section(title: &str, actions: &[&ResourceAction]) {
    if actions.is_empty() {
        return;
    }
    println!("{title}");
    for action in actions {
        println!("  {} {:<30} {}", symbol(action.status), action.name, status_text(action));
    }
    println!();
}

pub fn print_plan(actions: &[ResourceAction], apply: bool) {
    println!();
    let mailboxes: Vec<&ResourceAction> = actions.iter().filter(|a| a.kind == ResourceKind::Mailbox).collect();
    let labels: Vec<&ResourceAction> = actions.iter().filter(|a| a.kind == ResourceKind::Label).collect();
    let groups: Vec<&ResourceAction> = actions.iter().filter(|a| a.kind == ResourceKind::ContactGroup).collect();

    print_section("Mailboxes", &mailboxes);
    print_section("Action Labels", &labels);
    print_section("Contact Groups", &groups);

    let existing = actions.iter().filter(|a| a.status == ResourceStatus::Exists).count();
    let failed = actions.iter().filter(|a| a.status == ResourceStatus::Failed).count();
    let skipped = actions.iter().filter(|a| a.status == ResourceStatus::Skipped).count();

    let mut parts = if apply {
        let created = actions.iter().filter(|a| a.status == ResourceStatus::Created).count();
        vec![format!("{created} created"), format!("{existing} existing")]
    } else {
        let to_create = actions.iter().filter(|a| a.status == ResourceStatus::Create).count();
        vec![format!("{to_create} to create"), format!("{existing} existing")]
    };
    if failed > 0 {
        parts.push(format!("{failed} failed"));
    }
    if skipped > 0 {
        parts.push(format!("{skipped} skipped"));
    }
    println!("{}", parts.join(" \u{b7} "));
}
