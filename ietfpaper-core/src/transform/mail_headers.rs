//! Header extraction for archived mail messages.
//!
//! Only the header block is read. Archive messages span four decades of
//! mailers, so every field is parsed leniently: anything unparseable comes
//! back as `None` (or an empty address list) instead of an error.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use regex::Regex;

/// Timestamp layout stored in the database.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Rewrites for malformed `To:`/`Cc:` headers seen in the archive. Only the
/// first pattern that changes the value is applied.
const RECIPIENT_REWRITES: &[(&str, &str)] = &[
    // ietf-announce recipients mangled by various gateways
    (
        r#"("IETF-Announce:; ; ; ; ; @tis.com"@tis.com[; ]+ , )(.*)"#,
        "ietf-announce@ietf.org, ${2}",
    ),
    (
        r"(.*)(IETF-Announce:[ ;,]+[a-zA-Z\.@:;-]+$)",
        "${1}ietf-announce@ietf.org",
    ),
    (
        r"(.*)(IETF-Announce:(; )+[; a-z\.@\r\n]+)",
        "${1}ietf-announce@ietf.org",
    ),
    (
        r#"(.*)(<"?IETF-Announce:"?)([a-z0-9\.@;"]+)?(>)(, @tislabs.com@tislabs.com)?(.*)"#,
        "${1}<ietf-announce@ietf.org>${6}",
    ),
    (
        r"IETF-Announce: ;, tis.com@CNRI.Reston.VA.US, tis.com@magellan.tis.com",
        "ietf-announce@ietf.org",
    ),
    (
        r#"IETF-Announce: ;, "localhost.MIT.EDU": cclark@ietf.org;"#,
        "ietf-announce@ietf.org",
    ),
    (
        r"IETF-Announce: @IETF.CNRI.Reston.VA.US:;, IETF.CNRI.Reston.VA.US@isi.edu",
        "ietf-announce@ietf.org",
    ),
    (
        r"IETF-Announce <IETF-Announce:@auemlsrv.firewall.lucent.com;>",
        "ietf-announce@ietf.org",
    ),
    (
        r#"IETF-Announce: ;,  "CNRI.Reston.VA.US" <@sun.com:CNRI.Reston.VA.US@eng.sun.com>"#,
        "ietf-announce@ietf.org",
    ),
    (
        r#"IETF-Announce: ;,  "neptune.tis.com" <@tis.com, @baynetworks.com:neptune.tis.com@baynetworks.com>, tis.com@tis.com"#,
        "ietf-announce@ietf.org",
    ),
    (
        r#"IETF-Announce: "IETF-Announce:;@IETF.CNRI.Reston.VA.US@PacBell.COM" <>;,  IETF.CNRI.Reston.VA.US@pacbell.com"#,
        "ietf-announce@ietf.org",
    ),
    (
        r"IETF-Announce: %IETF.CNRI.Reston.VA.US@tgv.com;",
        "ietf-announce@ietf.org",
    ),
    (
        r"(IETF-Announce: ; ; ; , )(@pa.dec.com[ ;,]+)+",
        "ietf-announce@ietf.org",
    ),
    (r"IETF-Announce:;;;@gis.net;", "ietf-announce@ietf.org"),
    (r"IETF-Announce:;;@gis.net", "ietf-announce@ietf.org"),
    (r"IETF-Announce:@ietf.org, ;;;@ietf.org;", "ietf-announce@ietf.org"),
    (r#"IETF-Announce:@cisco.com, ";"@cisco.com"#, "ietf-announce@ietf.org"),
    (r#"IETF-Announce:, ";"@cisco.com"#, "ietf-announce@ietf.org"),
    (r"IETF-Announce:@cisco.com", "ietf-announce@ietf.org"),
    (r#""IETF-Announce:"@netcentrex.net"#, "ietf-announce@ietf.org"),
    (r"IETF-Announce:@above.proper.com", "ietf-announce@ietf.org"),
    (r"IETF-Announce:all-ietf@ietf.org", "ietf-announce@ietf.org"),
    (r"i IETF-Announce: ;", "ietf-announce@ietf.org"),
    (r"IETF-Announce: ;", "ietf-announce@ietf.org"),
    (r"IETF-Announce:;", "ietf-announce@ietf.org"),
    (r"IETF-Announce:", "ietf-announce@ietf.org"),
    // undisclosed recipients in one consistent form
    (
        r#"("?[Uu]ndisclosed.recipients"?: ;+)(, @[a-z\.]+)?(.*)"#,
        "undisclosed-recipients: ;${3}",
    ),
    (
        r"(.*)(unlisted-recipients:; \(no To-header on input\))(.*)",
        "${1}undisclosed-recipients: ;${3}",
    ),
    (
        r"(.*)(random-recipients:;;;@cs.utk.edu; \(info-mime and ietf-822 lists\))(.*)",
        "${1}undisclosed-recipients: ;${3}",
    ),
    (
        r#"(.*)("[A-Za-z\.]+":;+@tislabs.com;;;)(.*)"#,
        "${1}undisclosed-recipients: ;${3}",
    ),
    (r"undisclosed-recipients:;;:;", "undisclosed-recipients: ;"),
    // one-off breakage
    (r"(moore@cs.utk.edu)?(, )?(authors:;+@cs.utk.edu;+)(.*)", "${1}${4}"),
    (
        r"(RFC 3023 authors: ;)",
        "mmurata@trl.ibm.co.jp, simonstl@simonstl.com, dan@dankohn.com",
    ),
    (
        r"=\?ISO-8859-1\?B\?QWJhcmJhbmVsLA0KICAgIEJlbmphbWlu\?=",
        "Benjamin Abarbanel",
    ),
    (
        r"=\?ISO-8859-15\?B\?UGV0ZXJzb24sDQogICAgSm9u\?=",
        "Jon Peterson",
    ),
];

/// One entry of an address list. Either part may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Address {
    pub name: String,
    pub addr: String,
}

impl Address {
    fn has_dotted_domain(&self) -> bool {
        self.addr
            .rsplit_once('@')
            .is_some_and(|(_, domain)| domain.contains('.'))
    }
}

/// The header fields stored per message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedHeaders {
    pub from_name: Option<String>,
    pub from_addr: Option<String>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub subject: Option<String>,
    pub date: Option<String>,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
}

/// Unfolded header fields in message order, names lowercased.
#[derive(Debug, Clone, Default)]
pub struct HeaderFields {
    fields: Vec<(String, String)>,
}

impl HeaderFields {
    pub fn parse(raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw);
        let mut fields: Vec<(String, String)> = Vec::new();
        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                break;
            }
            if line.starts_with([' ', '\t']) {
                if let Some((_, value)) = fields.last_mut() {
                    value.push_str(line);
                }
                continue;
            }
            // mbox separators and other junk lines carry no colon
            if let Some((name, value)) = line.split_once(':') {
                fields.push((name.trim().to_ascii_lowercase(), value.trim_start().to_string()));
            }
        }
        Self { fields }
    }

    /// First occurrence of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Compiled header parser. Build once per database.
pub struct HeaderParser {
    rewrites: Vec<(Regex, &'static str)>,
    encoded_word: Regex,
}

impl HeaderParser {
    pub fn new() -> Result<Self, regex::Error> {
        let rewrites = RECIPIENT_REWRITES
            .iter()
            .map(|(pattern, replacement)| Ok((Regex::new(pattern)?, *replacement)))
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self {
            rewrites,
            encoded_word: Regex::new(r"=\?([^?\s]+)\?([BbQq])\?([^?\s]*)\?=")?,
        })
    }

    pub fn parse(&self, raw: &[u8]) -> ParsedHeaders {
        let headers = HeaderFields::parse(raw);
        let (from_name, from_addr) = headers
            .get("from")
            .map(|v| self.parse_from(v))
            .unwrap_or((None, None));
        ParsedHeaders {
            from_name,
            from_addr,
            to: headers
                .get("to")
                .map(|v| self.parse_recipients(v))
                .unwrap_or_default(),
            cc: headers
                .get("cc")
                .map(|v| self.parse_recipients(v))
                .unwrap_or_default(),
            subject: headers
                .get("subject")
                .map(|v| self.decode_encoded_words(v).trim().to_string()),
            date: headers.get("date").and_then(parse_date),
            message_id: headers.get("message-id").map(|v| v.trim().to_string()),
            in_reply_to: in_reply_to(&headers),
        }
    }

    /// Sender name and address. With several addresses, the first one whose
    /// domain contains a dot wins.
    pub fn parse_from(&self, value: &str) -> (Option<String>, Option<String>) {
        let addresses = parse_address_list(value);
        let chosen = match addresses.len() {
            0 => None,
            1 => addresses.into_iter().next(),
            _ => addresses.into_iter().find(Address::has_dotted_domain),
        };
        match chosen {
            Some(a) => (
                non_empty(self.decode_encoded_words(&a.name)),
                non_empty(a.addr),
            ),
            None => (None, None),
        }
    }

    /// `To:`/`Cc:` addresses after the archive rewrites.
    pub fn parse_recipients(&self, value: &str) -> Vec<Address> {
        parse_address_list(&self.rewrite_recipients(value))
            .into_iter()
            .map(|a| Address {
                name: self.decode_encoded_words(&a.name),
                addr: a.addr,
            })
            .collect()
    }

    pub fn rewrite_recipients(&self, value: &str) -> String {
        let value = value.replace("\r\n", "");
        for (pattern, replacement) in &self.rewrites {
            let rewritten = pattern.replace_all(&value, *replacement);
            if rewritten != value {
                return rewritten.into_owned();
            }
        }
        value
    }

    /// Decode RFC 2047 encoded words. Whitespace between adjacent encoded
    /// words is dropped; words that fail to decode are kept verbatim.
    pub fn decode_encoded_words(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        let mut last = 0;
        let mut prev_encoded = false;
        for caps in self.encoded_word.captures_iter(value) {
            let Some(m) = caps.get(0) else { continue };
            let gap = &value[last..m.start()];
            if !(prev_encoded && gap.trim().is_empty()) {
                out.push_str(gap);
            }
            match decode_word(&caps[1], &caps[2], &caps[3]) {
                Some(text) => {
                    out.push_str(&text);
                    prev_encoded = true;
                }
                None => {
                    out.push_str(m.as_str());
                    prev_encoded = false;
                }
            }
            last = m.end();
        }
        out.push_str(&value[last..]);
        out
    }
}

fn decode_word(charset: &str, encoding: &str, text: &str) -> Option<String> {
    let bytes = if encoding.eq_ignore_ascii_case("b") {
        STANDARD
            .decode(text)
            .or_else(|_| STANDARD_NO_PAD.decode(text))
            .ok()?
    } else {
        decode_q(text)?
    };
    // RFC 2231 language suffix: `iso-8859-1*en`
    let charset = charset
        .split('*')
        .next()
        .unwrap_or(charset)
        .to_ascii_lowercase();
    Some(match charset.as_str() {
        "iso-8859-1" | "iso-8859-15" | "latin1" | "windows-1252" => {
            bytes.iter().map(|&b| b as char).collect()
        }
        _ => String::from_utf8_lossy(&bytes).into_owned(),
    })
}

fn decode_q(text: &str) -> Option<Vec<u8>> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => out.push(b' '),
            b'=' => {
                let hex = text.get(i + 1..i + 3)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 2;
            }
            b => out.push(b),
        }
        i += 1;
    }
    Some(out)
}

/// Split an address list on top-level commas. Group syntax
/// (`name: a, b;`) contributes its members; an empty group contributes
/// nothing.
pub fn parse_address_list(value: &str) -> Vec<Address> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut escaped = false;
    let mut angle = 0usize;
    let mut paren = 0usize;

    for c in value.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quote || paren > 0 => {
                current.push(c);
                escaped = true;
            }
            '"' if paren == 0 => {
                in_quote = !in_quote;
                current.push(c);
            }
            '(' if !in_quote => {
                paren += 1;
                current.push(c);
            }
            ')' if !in_quote && paren > 0 => {
                paren -= 1;
                current.push(c);
            }
            '<' if !in_quote && paren == 0 => {
                angle += 1;
                current.push(c);
            }
            '>' if !in_quote && paren == 0 && angle > 0 => {
                angle -= 1;
                current.push(c);
            }
            ',' | ';' if !in_quote && paren == 0 && angle == 0 => {
                items.push(std::mem::take(&mut current));
            }
            // group display name
            ':' if !in_quote && paren == 0 && angle == 0 => current.clear(),
            _ => current.push(c),
        }
    }
    items.push(current);
    items.iter().filter_map(|item| parse_mailbox(item)).collect()
}

fn parse_mailbox(item: &str) -> Option<Address> {
    let (text, comment) = split_comments(item);
    let text = text.trim();
    let (name, addr) = match find_unquoted(text, '<') {
        Some(open) => {
            let rest = &text[open + 1..];
            let inner = rest.find('>').map_or(rest, |close| &rest[..close]);
            // source route: <@relay1,@relay2:user@host>
            let addr = inner.rfind(':').map_or(inner, |i| &inner[i + 1..]);
            let name = unquote(text[..open].trim());
            let name = if name.is_empty() { comment } else { name };
            (name, addr.trim().to_string())
        }
        None => (comment, text.to_string()),
    };
    if name.is_empty() && addr.is_empty() {
        None
    } else {
        Some(Address { name, addr })
    }
}

/// The item with parenthesized comments removed, and the comment text.
fn split_comments(item: &str) -> (String, String) {
    let mut text = String::with_capacity(item.len());
    let mut comments: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_quote = false;
    for c in item.chars() {
        match c {
            '"' if depth == 0 => {
                in_quote = !in_quote;
                text.push(c);
            }
            '(' if !in_quote => {
                if depth > 0 {
                    current.push(c);
                }
                depth += 1;
            }
            ')' if !in_quote && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    comments.push(std::mem::take(&mut current).trim().to_string());
                } else {
                    current.push(c);
                }
            }
            _ if depth > 0 => current.push(c),
            _ => text.push(c),
        }
    }
    (text, comments.join(" ").trim().to_string())
}

fn find_unquoted(text: &str, needle: char) -> Option<usize> {
    let mut in_quote = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quote => escaped = true,
            '"' => in_quote = !in_quote,
            c if c == needle && !in_quote => return Some(i),
            _ => {}
        }
    }
    None
}

fn unquote(s: &str) -> String {
    match s.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => s.to_string(),
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

fn in_reply_to(headers: &HeaderFields) -> Option<String> {
    if let Some(value) = headers.get("in-reply-to").map(str::trim)
        && !value.is_empty()
    {
        return Some(value.to_string());
    }
    headers
        .get("references")
        .and_then(|refs| refs.split_whitespace().last())
        .map(str::to_string)
}

/// Normalize a `Date:` header to UTC in [`DATE_FORMAT`].
///
/// Tried in order: RFC 2822; the day, month, year, time and zone fields
/// alone, ignoring the weekday and anything after the zone, with an
/// unparseable zone taken as UTC; `04-Jan-93 13:22:13`; `30-Nov-93 17:23`;
/// `2006-07-29 00:55:01`; the field form again with unpadded time fields
/// (`8: 9: 2`). Layouts without a zone are taken as UTC.
pub fn parse_date(value: &str) -> Option<String> {
    let value = strip_trailing_comment(value.trim());
    if value.is_empty() {
        return None;
    }
    if let Some(dt) = rfc2822(value).or_else(|| date_fields(value)) {
        return Some(format_utc(dt));
    }
    for layout in ["%d-%b-%y %H:%M:%S", "%d-%b-%y %H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, layout) {
            return Some(naive.format(DATE_FORMAT).to_string());
        }
    }
    let padded = value.replace(": ", ":0").replace("  ", " 0");
    date_fields(&padded).map(format_utc)
}

/// Parse `[Day,] DD Mon YYYY HH:MM[:SS] [zone] ...` from its first five
/// fields. The weekday is not checked against the date.
fn date_fields(value: &str) -> Option<DateTime<FixedOffset>> {
    let mut tokens: Vec<&str> = value.split_whitespace().collect();
    if let Some(first) = tokens.first()
        && (first.ends_with(',') || is_weekday(first))
    {
        tokens.remove(0);
    }
    if tokens.len() < 4 {
        return None;
    }
    let date = tokens[..4].join(" ");
    tokens
        .get(4)
        .and_then(|zone| rfc2822(&format!("{date} {zone}")))
        .or_else(|| rfc2822(&format!("{date} +0000")))
}

fn is_weekday(token: &str) -> bool {
    let token = token.trim_end_matches(',').to_ascii_lowercase();
    ["mon", "tue", "wed", "thu", "fri", "sat", "sun"]
        .iter()
        .any(|day| token.starts_with(day) && token.chars().all(|c| c.is_ascii_alphabetic()))
}

fn rfc2822(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc2822(value).ok()
}

fn format_utc(dt: DateTime<FixedOffset>) -> String {
    dt.with_timezone(&Utc).format(DATE_FORMAT).to_string()
}

/// `... +0200 (CEST)` -> `... +0200`
fn strip_trailing_comment(value: &str) -> &str {
    if value.ends_with(')')
        && let Some(open) = value.rfind('(')
    {
        return value[..open].trim_end();
    }
    value
}
