//! Message and index entry types.

use std::collections::BTreeSet;

use super::address::{self, EmailAddress};

/// Identifier of a message in the corpus. Also the rowid of its index entry.
pub type MessageId = i64;

/// Identifier of an account in the corpus.
pub type AccountId = i64;

/// Identifier of a folder in the corpus.
pub type FolderId = i64;

/// A message as resolved from the corpus, with everything the index needs
/// except the body text (which is extracted from the persisted content).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub account: AccountId,
    pub folder: FolderId,
    /// Received time in milliseconds since the Unix epoch.
    pub time: i64,
    pub from: Vec<EmailAddress>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub subject: Option<String>,
    /// IMAP keywords / labels attached to the message.
    pub keywords: BTreeSet<String>,
    /// Free-form user notes.
    pub notes: Option<String>,
}

/// One row of the full-text index, keyed by message id.
///
/// `time` is stored but not tokenized; every other text field is searchable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub id: MessageId,
    pub account: AccountId,
    pub folder: FolderId,
    pub time: i64,
    pub address: String,
    pub subject: String,
    pub keyword: String,
    pub text: String,
    pub notes: String,
}

impl IndexEntry {
    /// Build the index row for `message` with its extracted body `text`.
    ///
    /// Addresses are flattened from, to, cc, bcc in that order; keywords are
    /// joined with `", "`.
    pub fn from_message(message: &Message, text: impl Into<String>) -> Self {
        let address = address::format_list(
            message
                .from
                .iter()
                .chain(&message.to)
                .chain(&message.cc)
                .chain(&message.bcc),
        );
        let keyword = message
            .keywords
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");

        Self {
            id: message.id,
            account: message.account,
            folder: message.folder,
            time: message.time,
            address,
            subject: message.subject.clone().unwrap_or_default(),
            keyword,
            text: text.into(),
            notes: message.notes.clone().unwrap_or_default(),
        }
    }
}
