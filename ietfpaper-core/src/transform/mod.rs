//! Transform-stage rules: RFC and draft tables, and the mail archive
//! database.

pub mod csv;
pub mod drafts;
pub mod mail_db;
pub mod mail_headers;
pub mod rfc_index;

pub use drafts::{
    DraftHistory, DraftIndexEntry, DraftRevision, draft_history, draft_index, drafts_by_date,
    write_draft_history, write_draft_index, write_drafts_by_date,
};
pub use mail_db::{MailDatabaseStats, build_mail_database, dump_mail_database};
pub use mail_headers::{HeaderParser, ParsedHeaders, parse_date};
pub use rfc_index::{RfcEntry, parse_rfc_index, rfcs_by_year, write_rfcs_by_year};
