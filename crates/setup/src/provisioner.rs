//! Setup/provisioning (`mailroom setup`): reconciles required mailboxes,
//! action labels, and contact groups against what already exists,
//! dry-run by default. Grounded on the Python original's
//! `setup/provisioner.py`; sieve/filter-rule guidance generation is
//! explicitly out of scope and is not ported.

use std::collections::HashSet;

use contacts::ContactStoreClient;
use mail_api::MailApiClient;
use mailroom_config::{MailroomSettings, DEFAULT_CARDDAV_HOSTNAME, DEFAULT_MAIL_HOSTNAME};

use crate::reporting::{print_plan, ResourceAction, ResourceKind};

/// Compare required resources against what already exists; produce a
/// plan with every action marked `exists` or `create`.
pub async fn plan_resources(
    settings: &MailroomSettings,
    mail: &MailApiClient,
    contacts: &ContactStoreClient,
) -> anyhow::Result<Vec<ResourceAction>> {
    let existing_mailboxes = mail.list_existing_mailbox_names().await?;
    let existing_groups: HashSet<String> = contacts.list_groups().await?.into_iter().collect();

    let triage_labels: HashSet<&str> = settings.triage_labels().into_iter().collect();
    let mailbox_names: Vec<&str> = settings
        .required_mailboxes()
        .into_iter()
        .filter(|name| !triage_labels.contains(name))
        .collect();

    let mut actions = Vec::new();

    for name in mailbox_names {
        actions.push(if existing_mailboxes.contains(name) {
            ResourceAction::exists(ResourceKind::Mailbox, name)
        } else {
            ResourceAction::to_create(ResourceKind::Mailbox, name)
        });
    }

    for name in settings.triage_labels() {
        actions.push(if existing_mailboxes.contains(name) {
            ResourceAction::exists(ResourceKind::Label, name)
        } else {
            ResourceAction::to_create(ResourceKind::Label, name)
        });
    }

    for name in settings.contact_groups() {
        actions.push(if existing_groups.contains(name) {
            ResourceAction::exists(ResourceKind::ContactGroup, name)
        } else {
            ResourceAction::to_create(ResourceKind::ContactGroup, name)
        });
    }

    Ok(actions)
}

/// Execute the plan: create every `Create`-status resource, in order
/// mailboxes, then labels (also mailboxes), then contact groups.
pub async fn apply_resources(
    plan: Vec<ResourceAction>,
    mail: &MailApiClient,
    contacts: &ContactStoreClient,
) -> Vec<ResourceAction> {
    let mut result = Vec::with_capacity(plan.len());

    let (mailbox_like, groups): (Vec<ResourceAction>, Vec<ResourceAction>) =
        plan.into_iter().partition(|a| a.kind != ResourceKind::ContactGroup);

    for action in mailbox_like {
        if action.status != crate::reporting::ResourceStatus::Create {
            result.push(action);
            continue;
        }
        match mail.create_mailbox(&action.name, None).await {
            Ok(_) => result.push(ResourceAction::created(action.kind, action.name)),
            Err(e) => result.push(ResourceAction::failed(action.kind, action.name, e.to_string())),
        }
    }

    for action in groups {
        if action.status != crate::reporting::ResourceStatus::Create {
            result.push(action);
            continue;
        }
        match contacts.create_group(&action.name).await {
            Ok(()) => result.push(ResourceAction::created(action.kind, action.name)),
            Err(e) => result.push(ResourceAction::failed(action.kind, action.name, e.to_string())),
        }
    }

    result
}

/// Top-level entry point for the `setup` subcommand. Loads config,
/// connects both clients, plans, and (if `apply`) executes. Returns
/// the process exit code.
pub async fn run_setup(settings: MailroomSettings, apply: bool) -> i32 {
    let mail_hostname = settings.mail_hostname.as_deref().unwrap_or(DEFAULT_MAIL_HOSTNAME);
    let mut mail = match MailApiClient::new(&settings.jmap_token, mail_hostname) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("mail API client setup failed: {e}");
            return 1;
        }
    };
    if let Err(e) = mail.connect().await {
        eprintln!("mail API connection failed: {e}");
        return 1;
    }

    let (Some(username), Some(password)) = (&settings.carddav_username, &settings.carddav_password) else {
        eprintln!("CardDAV credentials are required for setup (MAILROOM_CARDDAV_USERNAME/MAILROOM_CARDDAV_PASSWORD)");
        return 1;
    };
    let hostname = settings.carddav_url.as_deref().unwrap_or(DEFAULT_CARDDAV_HOSTNAME);
    let mut contacts = match ContactStoreClient::new(username, password, hostname) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("CardDAV client setup failed: {e}");
            return 1;
        }
    };
    if let Err(e) = contacts.connect().await {
        eprintln!("CardDAV connection failed: {e}");
        return 1;
    }

    let plan = match plan_resources(&settings, &mail, &contacts).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("failed to build resource plan: {e}");
            return 1;
        }
    };

    if !apply {
        print_plan(&plan, false);
        return 0;
    }

    let result = apply_resources(plan, &mail, &contacts).await;
    print_plan(&result, true);
    let has_failures = result
        .iter()
        .any(|a| a.status == crate::reporting::ResourceStatus::Failed);
    if has_failures {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporting::ResourceStatus;

    #[test]
    fn resource_action_constructors_set_expected_status() {
        let a = ResourceAction::exists(ResourceKind::Mailbox, "Inbox");
        assert_eq!(a.status, ResourceStatus::Exists);
        let b = ResourceAction::to_create(ResourceKind::Label, "@ToFeed");
        assert_eq!(b.status, ResourceStatus::Create);
        let c = ResourceAction::failed(ResourceKind::ContactGroup, "Feed", "conflict");
        assert_eq!(c.status, ResourceStatus::Failed);
        assert_eq!(c.error.as_deref(), Some("conflict"));
    }
}
