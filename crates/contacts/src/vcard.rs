//! vCard 3.0 rendering and a forgiving parser for uploaded contact files.

use crate::types::Contact;

/// A card read from an uploaded file. Fields are raw; callers normalise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Card {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

pub fn render_card(contact: &Contact) -> String {
    let mut out = String::with_capacity(96);
    out.push_str("BEGIN:VCARD\r\nVERSION:3.0\r\n");
    out.push_str("FN:");
    out.push_str(&escape(&contact.name));
    out.push_str("\r\nTEL;TYPE=CELL:+");
    out.push_str(&contact.phone);
    out.push_str("\r\n");
    if !contact.email.is_empty() {
        out.push_str("EMAIL;TYPE=INTERNET:");
        out.push_str(&escape(&contact.email));
        out.push_str("\r\n");
    }
    out.push_str("END:VCARD\r\n");
    out
}

pub fn render_cards<'a>(contacts: impl IntoIterator<Item = &'a Contact>) -> String {
    contacts.into_iter().map(render_card).collect()
}

/// Parse every `BEGIN:VCARD` .. `END:VCARD` block in `input`.
///
/// Handles folded lines, property parameters (`TEL;TYPE=CELL:`), grouped
/// names (`item1.EMAIL:`) and the structured `N:` property when `FN:` is
/// absent. Only the first phone and email of a card are kept.
pub fn parse_cards(input: &str) -> Vec<Card> {
    let mut cards = Vec::new();
    let mut current: Option<Card> = None;
    let mut structured_name: Option<String> = None;

    for line in unfold(input) {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let property = key
            .split(';')
            .next()
            .unwrap_or_default()
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();

        match property.as_str() {
            "BEGIN" if value.trim().eq_ignore_ascii_case("VCARD") => {
                current = Some(Card::default());
                structured_name = None;
            },
            "END" if value.trim().eq_ignore_ascii_case("VCARD") => {
                if let Some(mut card) = current.take() {
                    if card.name.is_none() {
                        card.name = structured_name.take();
                    }
                    cards.push(card);
                }
            },
            "FN" => {
                if let Some(card) = current.as_mut() {
                    card.name = non_empty(unescape(value));
                }
            },
            "N" => {
                // N:Family;Given;Additional;Prefix;Suffix
                let parts: Vec<String> = split_unescaped(value, ';');
                let given = parts.get(1).map(String::as_str).unwrap_or_default();
                let family = parts.first().map(String::as_str).unwrap_or_default();
                structured_name = non_empty(format!("{given} {family}").trim().to_string());
            },
            "TEL" => {
                if let Some(card) = current.as_mut()
                    && card.phone.is_none()
                {
                    let v = value.trim();
                    let v = v.strip_prefix("tel:").unwrap_or(v);
                    card.phone = non_empty(v.to_string());
                }
            },
            "EMAIL" => {
                if let Some(card) = current.as_mut()
                    && card.email.is_none()
                {
                    card.email = non_empty(unescape(value));
                }
            },
            _ => {},
        }
    }
    cards
}

/// Join RFC 6350 folded lines (continuation lines start with space or tab).
fn unfold(input: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in input.lines() {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        match raw.strip_prefix([' ', '\t']) {
            Some(rest) if !lines.is_empty() => {
                if let Some(last) = lines.last_mut() {
                    last.push_str(rest);
                }
            },
            _ => lines.push(raw.to_string()),
        }
    }
    lines
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ',' => out.push_str("\\,"),
            ';' => out.push_str("\\;"),
            '\n' => out.push_str("\\n"),
            '\r' => {},
            _ => out.push(c),
        }
    }
    out
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n' | 'N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out.trim().to_string()
}

fn split_unescaped(value: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in value.chars() {
        if escaped {
            current.push('\\');
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == sep {
            parts.push(unescape(&current));
            current.clear();
        } else {
            current.push(c);
        }
    }
    parts.push(unescape(&current));
    parts
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}
