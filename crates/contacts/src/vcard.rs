//! Minimal vCard 3.0 encode/decode -- just the properties mailroom touches.
//!
//! No vCard crate exists anywhere in the corpus this repo is grounded on,
//! so this is hand-rolled, the same way the Python original hand-built
//! cards field by field through `vobject`.

use chrono::Local;
use uuid::Uuid;

use crate::error::ContactError;

pub const GROUP_KIND_PROP: &str = "X-ADDRESSBOOKSERVER-KIND";
pub const GROUP_MEMBER_PROP: &str = "X-ADDRESSBOOKSERVER-MEMBER";

#[derive(Debug, Clone, Default)]
pub struct VCard {
    pub uid: Option<String>,
    pub fn_name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub organization: Option<String>,
    pub emails: Vec<String>,
    pub note: Option<String>,
    pub kind: Option<String>,
    pub members: Vec<String>,
}

impl VCard {
    pub fn is_group(&self) -> bool {
        self.kind.as_deref().map(|k| k.eq_ignore_ascii_case("group")) == Some(true)
    }

    /// A brand-new company-type contact card: FN = org = name, no structured name.
    pub fn new_company(email: &str, display_name: Option<&str>) -> Self {
        let name = display_name
            .map(str::to_string)
            .unwrap_or_else(|| local_part(email));
        Self {
            uid: Some(Uuid::new_v4().to_string()),
            fn_name: Some(name.clone()),
            given_name: None,
            family_name: None,
            organization: Some(name),
            emails: vec![email.to_string()],
            note: Some(added_note()),
            kind: None,
            members: Vec::new(),
        }
    }

    /// A brand-new person-type contact card: FN split on the first
    /// whitespace run into given/family.
    pub fn new_person(email: &str, display_name: Option<&str>) -> Self {
        let name = display_name
            .map(str::to_string)
            .unwrap_or_else(|| local_part(email));
        let (given, family) = split_name(&name);
        Self {
            uid: Some(Uuid::new_v4().to_string()),
            fn_name: Some(name),
            given_name: Some(given),
            family_name: family,
            organization: None,
            emails: vec![email.to_string()],
            note: Some(added_note()),
            kind: None,
            members: Vec::new(),
        }
    }

    /// A brand-new, empty group card with the given display name.
    pub fn new_group(name: &str) -> Self {
        Self {
            uid: Some(Uuid::new_v4().to_string()),
            fn_name: Some(name.to_string()),
            given_name: None,
            family_name: None,
            organization: None,
            emails: Vec::new(),
            note: None,
            kind: Some("group".to_string()),
            members: Vec::new(),
        }
    }

    pub fn serialize(&self) -> String {
        let mut lines = vec!["BEGIN:VCARD".to_string(), "VERSION:3.0".to_string()];
        if let Some(uid) = &self.uid {
            lines.push(format!("UID:{}", escape(uid)));
        }
        if let Some(fn_name) = &self.fn_name {
            lines.push(format!("FN:{}", escape(fn_name)));
        }
        if self.given_name.is_some() || self.family_name.is_some() {
            let given = self.given_name.as_deref().unwrap_or("");
            let family = self.family_name.as_deref().unwrap_or("");
            lines.push(format!("N:{};{};;;", escape(family), escape(given)));
        }
        if let Some(org) = &self.organization {
            lines.push(format!("ORG:{}", escape(org)));
        }
        for email in &self.emails {
            lines.push(format!("EMAIL;TYPE=INTERNET:{}", escape(email)));
        }
        if let Some(note) = &self.note {
            lines.push(format!("NOTE:{}", escape(note)));
        }
        if let Some(kind) = &self.kind {
            lines.push(format!("{GROUP_KIND_PROP}:{}", escape(kind)));
        }
        for member in &self.members {
            lines.push(format!("{GROUP_MEMBER_PROP}:{}", escape(member)));
        }
        lines.push("END:VCARD".to_string());
        lines.join("\r\n") + "\r\n"
    }

    pub fn parse(text: &str) -> Result<Self, ContactError> {
        let mut card = VCard::default();
        for raw_line in unfold(text) {
            let (key_with_params, value) = match raw_line.split_once(':') {
                Some(pair) => pair,
                None => continue,
            };
            let key = key_with_params
                .split(';')
                .next()
                .unwrap_or("")
                .to_ascii_uppercase();
            let value = unescape(value);

            match key.as_str() {
                "UID" => card.uid = Some(value),
                "FN" => card.fn_name = Some(value),
                "N" => {
                    let parts: Vec<&str> = value.split(';').collect();
                    if let Some(family) = parts.first() {
                        if !family.is_empty() {
                            card.family_name = Some((*family).to_string());
                        }
                    }
                    if let Some(given) = parts.get(1) {
                        if !given.is_empty() {
                            card.given_name = Some((*given).to_string());
                        }
                    }
                }
                "ORG" => card.organization = Some(value),
                "EMAIL" => card.emails.push(value),
                "NOTE" => card.note = Some(value),
                k if k.eq_ignore_ascii_case(GROUP_KIND_PROP) => card.kind = Some(value),
                k if k.eq_ignore_ascii_case(GROUP_MEMBER_PROP) => card.members.push(value),
                _ => {}
            }
        }
        if card.uid.is_none() {
            return Err(ContactError::MalformedVCard("missing UID".to_string()));
        }
        Ok(card)
    }
}

fn local_part(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

fn split_name(name: &str) -> (String, Option<String>) {
    match name.split_once(char::is_whitespace) {
        Some((given, rest)) => {
            let family = rest.trim();
            if family.is_empty() {
                (given.to_string(), None)
            } else {
                (given.to_string(), Some(family.to_string()))
            }
        }
        None => (name.to_string(), None),
    }
}

pub(crate) fn added_note() -> String {
    format!("Added by Mailroom on {}", Local::now().date_naive())
}

pub fn updated_note() -> String {
    format!("Updated by Mailroom on {}", Local::now().date_naive())
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace(';', "\\;")
        .replace('\n', "\\n")
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') | Some('N') => out.push('\n'),
                Some(',') => out.push(','),
                Some(';') => out.push(';'),
                Some('\\') => out.push('\\'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Unfold RFC 6350 line continuations (a leading space or tab marks a
/// soft line break) and split on CRLF/LF.
fn unfold(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in text.split(['\n']) {
        let line = raw.trim_end_matches('\r');
        if (line.starts_with(' ') || line.starts_with('\t')) && !lines.is_empty() {
            let last = lines.last_mut().unwrap();
            last.push_str(&line[1..]);
        } else if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn company_card_sets_org_equal_to_fn() {
        let card = VCard::new_company("acme@example.com", Some("Acme Corp"));
        assert_eq!(card.fn_name.as_deref(), Some("Acme Corp"));
        assert_eq!(card.organization.as_deref(), Some("Acme Corp"));
        assert!(card.given_name.is_none());
    }

    #[test]
    fn person_card_splits_name_on_first_whitespace() {
        let card = VCard::new_person("jane@x.com", Some("Jane Smith"));
        assert_eq!(card.given_name.as_deref(), Some("Jane"));
        assert_eq!(card.family_name.as_deref(), Some("Smith"));
        assert!(card.organization.is_none());
    }

    #[test]
    fn person_card_single_word_name_has_no_family() {
        let card = VCard::new_person("jane@x.com", Some("Jane"));
        assert_eq!(card.given_name.as_deref(), Some("Jane"));
        assert!(card.family_name.is_none());
    }

    #[test]
    fn roundtrips_through_serialize_and_parse() {
        let card = VCard::new_company("acme@example.com", Some("Acme, Inc."));
        let text = card.serialize();
        let parsed = VCard::parse(&text).unwrap();
        assert_eq!(parsed.fn_name.as_deref(), Some("Acme, Inc."));
        assert_eq!(parsed.uid, card.uid);
        assert_eq!(parsed.emails, vec!["acme@example.com".to_string()]);
    }

    #[test]
    fn parses_group_membership() {
        let text = "BEGIN:VCARD\r\nVERSION:3.0\r\nUID:g1\r\nFN:Imbox\r\nX-ADDRESSBOOKSERVER-KIND:group\r\nX-ADDRESSBOOKSERVER-MEMBER:urn:uuid:abc\r\nEND:VCARD\r\n";
        let card = VCard::parse(text).unwrap();
        assert!(card.is_group());
        assert_eq!(card.members, vec!["urn:uuid:abc".to_string()]);
    }
}
