//! PROPFIND/REPORT XML helpers built on `quick-xml`'s streaming reader.
//!
//! The original client used `xml.etree.ElementTree` and `findtext`; the
//! shapes here are narrow enough (a handful of known element paths) that
//! a single-pass event reader stands in for a full DOM.

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::error::ContactError;

#[derive(Debug, Clone, Default)]
pub struct MultistatusItem {
    pub href: String,
    pub etag: String,
    pub vcard_data: String,
}

fn local_name(qname: &[u8]) -> &str {
    let s = std::str::from_utf8(qname).unwrap_or("");
    match s.rsplit_once(':') {
        Some((_, local)) => local,
        None => s,
    }
}

/// Find the text content of the first element whose ancestor path
/// (ignoring namespace prefixes) ends with `path`, e.g.
/// `["current-user-principal", "href"]`.
pub fn find_text_by_path(xml: &str, path: &[&str]) -> Result<Option<String>, ContactError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut stack: Vec<String> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| ContactError::MalformedXml(e.to_string()))?
        {
            Event::Start(e) => {
                stack.push(local_name(e.name().as_ref()).to_string());
                if ends_with(&stack, path) {
                    if let Event::Text(t) = reader
                        .read_event_into(&mut buf)
                        .map_err(|e| ContactError::MalformedXml(e.to_string()))?
                    {
                        let text = t
                            .unescape()
                            .map_err(|e| ContactError::MalformedXml(e.to_string()))?
                            .into_owned();
                        return Ok(Some(text));
                    }
                }
            }
            Event::Empty(_) => {}
            Event::End(_) => {
                stack.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(None)
}

fn ends_with(stack: &[String], suffix: &[&str]) -> bool {
    if stack.len() < suffix.len() {
        return false;
    }
    stack[stack.len() - suffix.len()..]
        .iter()
        .zip(suffix)
        .all(|(a, b)| a == b)
}

/// Parse a DAV `<response>` list, matching the addressbook collection
/// whose `resourcetype` contains an `addressbook` child with a 200 status.
pub fn find_addressbook_collection_href(xml: &str) -> Result<Option<String>, ContactError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut cur_href: Option<String> = None;
    let mut cur_status_ok = false;
    let mut cur_is_addressbook = false;
    let mut in_resourcetype = false;
    let mut stack: Vec<String> = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| ContactError::MalformedXml(e.to_string()))?
        {
            Event::Start(e) => {
                let name = local_name(e.name().as_ref()).to_string();
                if name == "response" {
                    cur_href = None;
                    cur_status_ok = false;
                    cur_is_addressbook = false;
                }
                if name == "resourcetype" {
                    in_resourcetype = true;
                }
                if in_resourcetype && name == "addressbook" {
                    cur_is_addressbook = true;
                }
                stack.push(name.clone());
                if ends_with(&stack, &["response", "href"]) {
                    if let Event::Text(t) = reader
                        .read_event_into(&mut buf)
                        .map_err(|e| ContactError::MalformedXml(e.to_string()))?
                    {
                        cur_href = Some(
                            t.unescape()
                                .map_err(|e| ContactError::MalformedXml(e.to_string()))?
                                .into_owned(),
                        );
                    }
                } else if name == "status" {
                    if let Event::Text(t) = reader
                        .read_event_into(&mut buf)
                        .map_err(|e| ContactError::MalformedXml(e.to_string()))?
                    {
                        let text = t
                            .unescape()
                            .map_err(|e| ContactError::MalformedXml(e.to_string()))?;
                        if text.contains("200") {
                            cur_status_ok = true;
                        }
                    }
                }
            }
            Event::Empty(e) => {
                let name = local_name(e.name().as_ref()).to_string();
                if in_resourcetype && name == "addressbook" {
                    cur_is_addressbook = true;
                }
            }
            Event::End(e) => {
                let name = local_name(e.name().as_ref()).to_string();
                if name == "resourcetype" {
                    in_resourcetype = false;
                }
                if name == "response" {
                    if cur_status_ok && cur_is_addressbook {
                        if let Some(href) = cur_href.take() {
                            return Ok(Some(href));
                        }
                    }
                }
                stack.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(None)
}

/// Parse a 207 Multi-Status body into `{href, etag, vcard_data}` items,
/// keeping only responses whose propstat reported a 200 status.
pub fn parse_multistatus(xml: &str) -> Result<Vec<MultistatusItem>, ContactError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut items = Vec::new();
    let mut cur = MultistatusItem::default();
    let mut status_ok = false;
    let mut stack: Vec<String> = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| ContactError::MalformedXml(e.to_string()))?
        {
            Event::Start(e) => {
                let name = local_name(e.name().as_ref()).to_string();
                if name == "response" {
                    cur = MultistatusItem::default();
                    status_ok = false;
                }
                stack.push(name.clone());
                if ends_with(&stack, &["response", "href"]) {
                    if let Event::Text(t) = reader
                        .read_event_into(&mut buf)
                        .map_err(|e| ContactError::MalformedXml(e.to_string()))?
                    {
                        cur.href = t
                            .unescape()
                            .map_err(|e| ContactError::MalformedXml(e.to_string()))?
                            .into_owned();
                    }
                } else if name == "status" {
                    if let Event::Text(t) = reader
                        .read_event_into(&mut buf)
                        .map_err(|e| ContactError::MalformedXml(e.to_string()))?
                    {
                        let text = t
                            .unescape()
                            .map_err(|e| ContactError::MalformedXml(e.to_string()))?;
                        status_ok = text.contains("200");
                    }
                } else if name == "getetag" {
                    if let Event::Text(t) = reader
                        .read_event_into(&mut buf)
                        .map_err(|e| ContactError::MalformedXml(e.to_string()))?
                    {
                        cur.etag = t
                            .unescape()
                            .map_err(|e| ContactError::MalformedXml(e.to_string()))?
                            .into_owned();
                    }
                } else if name == "address-data" {
                    if let Event::Text(t) = reader
                        .read_event_into(&mut buf)
                        .map_err(|e| ContactError::MalformedXml(e.to_string()))?
                    {
                        cur.vcard_data = t
                            .unescape()
                            .map_err(|e| ContactError::MalformedXml(e.to_string()))?
                            .into_owned();
                    }
                }
            }
            Event::End(e) => {
                let name = local_name(e.name().as_ref());
                if name == "response" {
                    if status_ok && !cur.vcard_data.is_empty() {
                        items.push(cur.clone());
                    } else if status_ok && !cur.href.is_empty() && cur.vcard_data.is_empty() {
                        // href-only propstat (e.g. PROPFIND for collections); still useful to callers
                        items.push(cur.clone());
                    }
                }
                stack.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(items)
}

/// Build a REPORT body for an `EMAIL` prop-filter, properly XML-escaping
/// the address.
pub fn search_by_email_report_body(email: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<C:addressbook-query xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:carddav">
  <D:prop>
    <D:getetag/>
    <C:address-data/>
  </D:prop>
  <C:filter test="anyof">
    <C:prop-filter name="EMAIL">
      <C:text-match collation="i;unicode-casemap" match-type="equals">{}</C:text-match>
    </C:prop-filter>
  </C:filter>
</C:addressbook-query>"#,
        escape_xml_text(email)
    )
}

fn escape_xml_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_href_by_path() {
        let xml = r#"<?xml version="1.0"?><D:multistatus xmlns:D="DAV:"><D:response><D:propstat><D:prop><D:current-user-principal><D:href>/principals/user/</D:href></D:current-user-principal></D:prop></D:propstat></D:response></D:multistatus>"#;
        let href = find_text_by_path(xml, &["current-user-principal", "href"]).unwrap();
        assert_eq!(href.as_deref(), Some("/principals/user/"));
    }

    #[test]
    fn escapes_email_in_report_body() {
        let body = search_by_email_report_body("a&b@example.com");
        assert!(body.contains("a&amp;b@example.com"));
    }
}
