//! SQLite database of the mail archive mirror, and its text dump.

use crate::artifact::{remove_temp_siblings, temp_sibling};
use crate::error::{PaperError, TransformError};
use crate::fetch::{FolderDump, FolderList};
use crate::transform::mail_headers::{HeaderParser, ParsedHeaders};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, params};
use std::collections::HashMap;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const SCHEMA: &str = "
CREATE TABLE ietf_ma_messages (
  message_num    INTEGER PRIMARY KEY AUTOINCREMENT,
  mailing_list   TEXT NOT NULL,
  uidvalidity    INTEGER NOT NULL,
  uid            INTEGER NOT NULL,
  from_name      TEXT,
  from_addr      TEXT,
  subject        TEXT,
  date           TEXT,
  message_id     TEXT,
  in_reply_to    TEXT,
  message        BLOB,
  FOREIGN KEY (mailing_list) REFERENCES ietf_ma_lists (name)
);
CREATE INDEX index_ietf_ma_messages_mailing_list ON ietf_ma_messages(mailing_list);
CREATE INDEX index_ietf_ma_messages_from_addr    ON ietf_ma_messages(from_addr);
CREATE INDEX index_ietf_ma_messages_date         ON ietf_ma_messages(date);
CREATE INDEX index_ietf_ma_messages_subject      ON ietf_ma_messages(subject);
CREATE INDEX index_ietf_ma_messages_message_id   ON ietf_ma_messages(message_id);
CREATE INDEX index_ietf_ma_messages_in_reply_to  ON ietf_ma_messages(in_reply_to);

CREATE TABLE ietf_ma_messages_to (
  id          INTEGER PRIMARY KEY AUTOINCREMENT,
  message_num INTEGER,
  to_name     TEXT,
  to_addr     TEXT,
  FOREIGN KEY (message_num) REFERENCES ietf_ma_messages (message_num)
);
CREATE INDEX index_ietf_ma_messages_to_message_num ON ietf_ma_messages_to(message_num);
CREATE INDEX index_ietf_ma_messages_to_to_addr     ON ietf_ma_messages_to(to_addr);

CREATE TABLE ietf_ma_messages_cc (
  id          INTEGER PRIMARY KEY AUTOINCREMENT,
  message_num INTEGER,
  cc_name     TEXT,
  cc_addr     TEXT,
  FOREIGN KEY (message_num) REFERENCES ietf_ma_messages (message_num)
);
CREATE INDEX index_ietf_ma_messages_cc_message_num ON ietf_ma_messages_cc(message_num);
CREATE INDEX index_ietf_ma_messages_cc_cc_addr     ON ietf_ma_messages_cc(cc_addr);

CREATE TABLE ietf_ma_lists (
  name       TEXT NOT NULL PRIMARY KEY,
  msg_count  INTEGER,
  first_date TEXT,
  last_date  TEXT
);
CREATE INDEX index_ietf_ma_lists_name ON ietf_ma_lists(name);
";

const DUMP_QUERIES: [&str; 3] = [
    "SELECT message_num, mailing_list, uidvalidity, uid, from_name, from_addr, subject, date, message_id, in_reply_to FROM ietf_ma_messages",
    "SELECT id, message_num, to_name, to_addr FROM ietf_ma_messages_to",
    "SELECT id, message_num, cc_name, cc_addr FROM ietf_ma_messages_cc",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailDatabaseStats {
    pub lists: usize,
    pub messages: usize,
    /// Messages whose `Date:` could not be parsed.
    pub undated: usize,
}

/// Build the archive database from `lists.json` and the per-folder dumps.
///
/// Folders are loaded in `lists.json` order; each must have a file in
/// `folder_files` named `<folder>.json`. The database is built in a
/// temporary sibling of `output`, vacuumed, then renamed into place.
pub fn build_mail_database(
    lists_json: &Path,
    folder_files: &[PathBuf],
    output: &Path,
) -> Result<MailDatabaseStats, PaperError> {
    let list: FolderList = serde_json::from_str(&std::fs::read_to_string(lists_json)?)?;
    let by_name: HashMap<String, &PathBuf> = folder_files
        .iter()
        .filter_map(|p| {
            p.file_stem()
                .map(|s| (s.to_string_lossy().into_owned(), p))
        })
        .collect();
    let mut sources = Vec::with_capacity(list.folders.len());
    for folder in &list.folders {
        let path = by_name
            .get(folder)
            .ok_or_else(|| TransformError::InvalidInput {
                path: lists_json.to_path_buf(),
                message: format!("no downloaded archive for folder '{folder}'"),
            })?;
        sources.push(path.as_path());
    }

    let parser = HeaderParser::new().map_err(TransformError::from)?;
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = temp_sibling(output);
    remove_temp_siblings(output);

    let stats = match populate(&tmp, &sources, &parser) {
        Ok(stats) => stats,
        Err(e) => {
            remove_temp_siblings(output);
            return Err(e);
        }
    };
    if let Err(e) = std::fs::rename(&tmp, output) {
        remove_temp_siblings(output);
        return Err(e.into());
    }
    info!(
        lists = stats.lists,
        messages = stats.messages,
        undated = stats.undated,
        db = %output.display(),
        "Built mail archive database"
    );
    Ok(stats)
}

fn populate(
    db: &Path,
    sources: &[&Path],
    parser: &HeaderParser,
) -> Result<MailDatabaseStats, PaperError> {
    let mut conn = Connection::open(db)?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.execute_batch(SCHEMA)?;

    let mut stats = MailDatabaseStats::default();
    for source in sources {
        let dump: FolderDump = serde_json::from_str(&std::fs::read_to_string(source)?)?;
        let tx = conn.transaction()?;
        let mut first_date: Option<String> = None;
        let mut last_date: Option<String> = None;
        {
            let mut insert_msg = tx.prepare_cached(
                "INSERT INTO ietf_ma_messages (mailing_list, uidvalidity, uid, from_name, from_addr, \
                 subject, date, message_id, in_reply_to, message) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            let mut insert_to = tx.prepare_cached(
                "INSERT INTO ietf_ma_messages_to (message_num, to_name, to_addr) VALUES (?1, ?2, ?3)",
            )?;
            let mut insert_cc = tx.prepare_cached(
                "INSERT INTO ietf_ma_messages_cc (message_num, cc_name, cc_addr) VALUES (?1, ?2, ?3)",
            )?;

            for msg in &dump.msgs {
                let raw = STANDARD
                    .decode(&msg.msg)
                    .map_err(|e| TransformError::InvalidInput {
                        path: source.to_path_buf(),
                        message: format!("uid {}: {e}", msg.uid),
                    })?;
                let headers: ParsedHeaders = parser.parse(&raw);
                insert_msg.execute(params![
                    dump.folder,
                    dump.uidvalidity,
                    msg.uid,
                    headers.from_name,
                    headers.from_addr,
                    headers.subject,
                    headers.date,
                    headers.message_id,
                    headers.in_reply_to,
                    raw,
                ])?;
                let num = tx.last_insert_rowid();
                for a in &headers.to {
                    insert_to.execute(params![num, a.name, a.addr])?;
                }
                for a in &headers.cc {
                    insert_cc.execute(params![num, a.name, a.addr])?;
                }

                match headers.date {
                    Some(date) => {
                        if first_date.as_ref().is_none_or(|d| date < *d) {
                            first_date = Some(date.clone());
                        }
                        if last_date.as_ref().is_none_or(|d| date > *d) {
                            last_date = Some(date);
                        }
                    }
                    None => stats.undated += 1,
                }
            }
        }
        tx.execute(
            "INSERT INTO ietf_ma_lists (name, msg_count, first_date, last_date) VALUES (?1, ?2, ?3, ?4)",
            params![dump.folder, dump.msgs.len() as i64, first_date, last_date],
        )?;
        tx.commit()?;
        debug!(folder = %dump.folder, messages = dump.msgs.len(), "Indexed mail folder");
        stats.lists += 1;
        stats.messages += dump.msgs.len();
    }

    conn.execute_batch("VACUUM")?;
    conn.pragma_update_and_check(None, "journal_mode", "DELETE", |row| row.get::<_, String>(0))?;
    conn.close().map_err(|(_, e)| e)?;
    Ok(stats)
}

/// Write every row of the three message tables, one tuple per line.
/// Returns the number of lines written.
pub fn dump_mail_database(db: &Path, output: &Path) -> Result<usize, PaperError> {
    let conn = Connection::open_with_flags(db, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = temp_sibling(output);
    let result = (|| -> Result<usize, PaperError> {
        let mut out = BufWriter::new(std::fs::File::create(&tmp)?);
        let mut lines = 0;
        for sql in DUMP_QUERIES {
            lines += dump_rows(&conn, sql, &mut out)?;
        }
        out.flush()?;
        Ok(lines)
    })();
    match result {
        Ok(lines) => {
            std::fs::rename(&tmp, output)?;
            info!(lines, out = %output.display(), "Dumped mail archive database");
            Ok(lines)
        }
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            Err(e)
        }
    }
}

fn dump_rows(conn: &Connection, sql: &str, out: &mut impl Write) -> Result<usize, PaperError> {
    let mut stmt = conn.prepare(sql)?;
    let columns = stmt.column_count();
    let mut rows = stmt.query([])?;
    let mut count = 0;
    while let Some(row) = rows.next()? {
        let mut fields = Vec::with_capacity(columns);
        for i in 0..columns {
            fields.push(tuple_field(&row.get::<_, Value>(i)?));
        }
        writeln!(out, "({})", fields.join(", "))?;
        count += 1;
    }
    Ok(count)
}

/// Tuple-literal rendering of one column value: `None`, integers, and
/// single-quoted strings (double-quoted when the text holds only single
/// quotes).
fn tuple_field(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => quote_text(s),
        Value::Blob(b) => format!("b{}", quote_text(&String::from_utf8_lossy(b))),
    }
}

fn quote_text(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c == '\u{7f}' => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}
