//! Triage category definitions: user input, resolution, and validation.
//!
//! Mirrors `mailroom/core/config.py`'s `TriageCategory`/`ResolvedCategory`
//! split: users provide a sparse `TriageCategory` (only `name` required),
//! and `resolve_categories` turns the whole list into fully concrete
//! `ResolvedCategory` values after validating cross-category constraints.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactType {
    Company,
    Person,
}

impl Default for ContactType {
    fn default() -> Self {
        ContactType::Company
    }
}

/// A single triage category as the user wrote it in `config.yaml`.
///
/// Only `name` is required; every other field is derived from the name
/// (see [`resolve_categories`]) unless the user overrides it.
#[derive(Debug, Clone, Deserialize)]
pub struct TriageCategory {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub contact_group: Option<String>,
    #[serde(default)]
    pub destination_mailbox: Option<String>,
    #[serde(default)]
    pub contact_type: ContactType,
    #[serde(default)]
    pub parent: Option<String>,
}

/// A fully resolved triage category -- every field concrete, no more
/// derivation or inheritance left to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCategory {
    pub name: String,
    pub label: String,
    pub contact_group: String,
    pub destination_mailbox: String,
    pub contact_type: ContactType,
    pub parent: Option<String>,
}

/// Derive an action label from a category name: `"Paper Trail"` -> `"@ToPaperTrail"`.
pub fn derive_label(name: &str) -> String {
    format!("@To{}", name.split_whitespace().collect::<String>())
}

fn derive_contact_group(name: &str) -> String {
    name.to_string()
}

fn derive_destination_mailbox(name: &str) -> String {
    name.to_string()
}

/// The categories used when `triage.categories` is absent from `config.yaml`.
pub fn default_categories() -> Vec<TriageCategory> {
    vec![
        TriageCategory {
            name: "Imbox".to_string(),
            label: None,
            contact_group: None,
            destination_mailbox: Some("Inbox".to_string()),
            contact_type: ContactType::Company,
            parent: None,
        },
        TriageCategory {
            name: "Feed".to_string(),
            label: None,
            contact_group: None,
            destination_mailbox: None,
            contact_type: ContactType::Company,
            parent: None,
        },
        TriageCategory {
            name: "Paper Trail".to_string(),
            label: None,
            contact_group: None,
            destination_mailbox: None,
            contact_type: ContactType::Company,
            parent: None,
        },
        TriageCategory {
            name: "Jail".to_string(),
            label: None,
            contact_group: None,
            destination_mailbox: None,
            contact_type: ContactType::Company,
            parent: None,
        },
        TriageCategory {
            name: "Person".to_string(),
            label: None,
            contact_group: None,
            destination_mailbox: None,
            contact_type: ContactType::Person,
            parent: Some("Imbox".to_string()),
        },
    ]
}

/// Validate a list of triage categories, collecting *every* error found
/// rather than stopping at the first one. Mirrors
/// `config.py::_validate_categories` check for check.
fn validate_categories(categories: &[TriageCategory]) -> Vec<String> {
    let mut errors = Vec::new();

    if categories.is_empty() {
        errors.push("At least one triage category is required.".to_string());
        return errors;
    }

    // Duplicate names
    let mut seen_names: HashSet<&str> = HashSet::new();
    for cat in categories {
        if !seen_names.insert(cat.name.as_str()) {
            errors.push(format!("Duplicate category name: '{}'", cat.name));
        }
    }

    // Parent references exist
    let name_set: HashSet<&str> = categories.iter().map(|c| c.name.as_str()).collect();
    for cat in categories {
        if let Some(parent) = &cat.parent {
            if !name_set.contains(parent.as_str()) {
                errors.push(format!(
                    "Category '{}' references non-existent parent '{}'",
                    cat.name, parent
                ));
            }
        }
    }

    // Circular parent chains (including self-reference)
    let parent_map: HashMap<&str, Option<&str>> = categories
        .iter()
        .map(|c| (c.name.as_str(), c.parent.as_deref()))
        .collect();
    let mut checked: HashSet<&str> = HashSet::new();
    for cat in categories {
        if cat.parent.is_some() && !checked.contains(cat.name.as_str()) {
            let mut visited: HashSet<&str> = HashSet::new();
            visited.insert(cat.name.as_str());
            let mut current = cat.parent.as_deref();
            while let Some(cur) = current {
                if visited.contains(cur) {
                    errors.push(format!("Circular parent chain involving '{}'", cat.name));
                    break;
                }
                if !name_set.contains(cur) {
                    break; // already reported as non-existent parent
                }
                visited.insert(cur);
                current = parent_map.get(cur).copied().flatten();
            }
            checked.extend(visited);
        }
    }

    // Duplicate labels after derivation
    let mut label_owners: HashMap<String, &str> = HashMap::new();
    for cat in categories {
        let label = cat
            .label
            .clone()
            .unwrap_or_else(|| derive_label(&cat.name));
        if let Some(owner) = label_owners.get(&label) {
            errors.push(format!(
                "Duplicate triage label '{}' (from '{}' and '{}')",
                label, owner, cat.name
            ));
        } else {
            label_owners.insert(label, cat.name.as_str());
        }
    }

    // Shared contact groups without a parent relationship
    let mut group_owners: HashMap<String, Vec<&str>> = HashMap::new();
    for cat in categories {
        let group = cat
            .contact_group
            .clone()
            .unwrap_or_else(|| derive_contact_group(&cat.name));
        group_owners.entry(group).or_default().push(cat.name.as_str());
    }
    for (group, owners) in &group_owners {
        if owners.len() > 1 {
            for i in 0..owners.len() {
                for b in &owners[i + 1..] {
                    let a = owners[i];
                    let cat_a = categories.iter().find(|c| c.name == a).unwrap();
                    let cat_b = categories.iter().find(|c| c.name == *b).unwrap();
                    let a_parents_b = cat_a.parent.as_deref() == Some(*b);
                    let b_parents_a = cat_b.parent.as_deref() == Some(a);
                    if !a_parents_b && !b_parents_a {
                        errors.push(format!(
                            "Categories '{}' and '{}' share contact group '{}' without a parent relationship",
                            a, b, group
                        ));
                    }
                }
            }
        }
    }

    errors
}

/// Resolve a user-provided category list into fully concrete
/// [`ResolvedCategory`] values.
///
/// Validates every cross-category constraint first (collecting all
/// errors), then resolves in two passes: derive each category's own
/// fields, then apply parent inheritance for `contact_group` and
/// `destination_mailbox` -- but only for fields the child left unset.
pub fn resolve_categories(categories: &[TriageCategory]) -> Result<Vec<ResolvedCategory>, String> {
    let errors = validate_categories(categories);
    if !errors.is_empty() {
        return Err(format!(
            "Invalid triage category configuration:\n{}",
            errors
                .iter()
                .map(|e| format!("  - {e}"))
                .collect::<Vec<_>>()
                .join("\n")
        ));
    }

    let mut first_pass: HashMap<String, ResolvedCategory> = HashMap::new();
    for cat in categories {
        first_pass.insert(
            cat.name.clone(),
            ResolvedCategory {
                name: cat.name.clone(),
                label: cat.label.clone().unwrap_or_else(|| derive_label(&cat.name)),
                contact_group: cat
                    .contact_group
                    .clone()
                    .unwrap_or_else(|| derive_contact_group(&cat.name)),
                destination_mailbox: cat
                    .destination_mailbox
                    .clone()
                    .unwrap_or_else(|| derive_destination_mailbox(&cat.name)),
                contact_type: cat.contact_type,
                parent: cat.parent.clone(),
            },
        );
    }

    let mut resolved = Vec::with_capacity(categories.len());
    for cat in categories {
        let mut r = first_pass.get(&cat.name).unwrap().clone();
        if let Some(parent_name) = &cat.parent {
            if let Some(parent_resolved) = first_pass.get(parent_name) {
                if cat.contact_group.is_none() {
                    r.contact_group = parent_resolved.contact_group.clone();
                }
                if cat.destination_mailbox.is_none() {
                    r.destination_mailbox = parent_resolved.destination_mailbox.clone();
                }
            }
        }
        resolved.push(r);
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat(name: &str) -> TriageCategory {
        TriageCategory {
            name: name.to_string(),
            label: None,
            contact_group: None,
            destination_mailbox: None,
            contact_type: ContactType::Company,
            parent: None,
        }
    }

    #[test]
    fn derives_label_from_multi_word_name() {
        assert_eq!(derive_label("Paper Trail"), "@ToPaperTrail");
        assert_eq!(derive_label("Imbox"), "@ToImbox");
    }

    #[test]
    fn default_categories_resolve_person_destination_to_inbox() {
        let resolved = resolve_categories(&default_categories()).unwrap();
        let imbox = resolved.iter().find(|c| c.name == "Imbox").unwrap();
        assert_eq!(imbox.destination_mailbox, "Inbox");
        let person = resolved.iter().find(|c| c.name == "Person").unwrap();
        assert_eq!(person.destination_mailbox, "Inbox");
        assert_eq!(person.contact_group, "Imbox");
        assert_eq!(person.contact_type, ContactType::Person);
    }

    #[test]
    fn rejects_empty_category_list() {
        let err = resolve_categories(&[]).unwrap_err();
        assert!(err.contains("At least one triage category is required"));
    }

    #[test]
    fn rejects_duplicate_names() {
        let cats = vec![cat("Feed"), cat("Feed")];
        let err = resolve_categories(&cats).unwrap_err();
        assert!(err.contains("Duplicate category name: 'Feed'"));
    }

    #[test]
    fn rejects_dangling_parent_reference() {
        let mut child = cat("Person");
        child.parent = Some("Ghost".to_string());
        let err = resolve_categories(&[child]).unwrap_err();
        assert!(err.contains("references non-existent parent"));
    }

    #[test]
    fn rejects_self_parent_cycle() {
        let mut c = cat("Loop");
        c.parent = Some("Loop".to_string());
        let err = resolve_categories(&[c]).unwrap_err();
        assert!(err.contains("Circular parent chain"));
    }

    #[test]
    fn rejects_shared_group_without_parent_relation() {
        let mut a = cat("Feed");
        a.contact_group = Some("Shared".to_string());
        let mut b = cat("Jail");
        b.contact_group = Some("Shared".to_string());
        let err = resolve_categories(&[a, b]).unwrap_err();
        assert!(err.contains("share contact group"));
    }

    #[test]
    fn allows_shared_group_between_parent_and_child() {
        let parent = cat("Imbox");
        let mut child = cat("Person");
        child.parent = Some("Imbox".to_string());
        let resolved = resolve_categories(&[parent, child]).unwrap();
        assert_eq!(resolved[1].contact_group, "Imbox");
    }

    #[test]
    fn child_override_beats_parent_inheritance() {
        let parent = cat("Imbox");
        let mut child = cat("Person");
        child.parent = Some("Imbox".to_string());
        child.destination_mailbox = Some("PersonBox".to_string());
        let resolved = resolve_categories(&[parent, child]).unwrap();
        let person = resolved.iter().find(|c| c.name == "Person").unwrap();
        assert_eq!(person.destination_mailbox, "PersonBox");
    }
}
