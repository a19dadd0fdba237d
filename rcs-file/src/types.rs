use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::{Error, Num};

/// The parsed structure of a single RCS ",v" file.
#[derive(Debug, Clone)]
pub struct RcsFile {
    pub admin: Admin,
    pub deltas: HashMap<Num, Delta>,
    pub desc: Vec<u8>,
    pub texts: HashMap<Num, DeltaText>,
}

#[derive(Debug, Clone, Default)]
pub struct Admin {
    pub head: Option<Num>,
    pub branch: Option<Num>,
    pub access: Vec<Vec<u8>>,
    pub symbols: HashMap<Vec<u8>, Num>,
    pub locks: HashMap<Vec<u8>, Num>,
    pub strict: bool,
    pub comment: Option<Vec<u8>>,
    pub expand: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct Delta {
    pub date: DateTime<Utc>,
    pub author: Vec<u8>,
    pub state: Option<Vec<u8>>,
    pub branches: Vec<Num>,
    pub next: Option<Num>,
    pub commit_id: Option<Vec<u8>>,
}

impl Delta {
    /// A `dead` state means the file does not exist at this revision.
    pub fn is_dead(&self) -> bool {
        self.state.as_deref() == Some(b"dead".as_ref())
    }
}

#[derive(Debug, Clone)]
pub struct DeltaText {
    pub log: Vec<u8>,
    pub text: Vec<u8>,
}

/// Keyword substitution mode, from the admin `expand` phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordMode {
    /// `kv`: expand to `$Keyword: value $`. The default.
    KeywordValue,
    /// `kvl`: like `kv`, with the locker's name in the value.
    KeywordValueLocker,
    /// `k`: collapse to `$Keyword$`.
    KeywordOnly,
    /// `o`: keep the stored contents verbatim.
    Old,
    /// `b`: binary; no substitution at all.
    Binary,
    /// `v`: value only, no `$` delimiters.
    ValueOnly,
}

impl KeywordMode {
    pub fn from_flags(flags: &[u8]) -> Option<Self> {
        match flags {
            b"kv" => Some(KeywordMode::KeywordValue),
            b"kvl" => Some(KeywordMode::KeywordValueLocker),
            b"k" => Some(KeywordMode::KeywordOnly),
            b"o" => Some(KeywordMode::Old),
            b"b" => Some(KeywordMode::Binary),
            b"v" => Some(KeywordMode::ValueOnly),
            _ => None,
        }
    }
}

impl Default for KeywordMode {
    fn default() -> Self {
        KeywordMode::KeywordValue
    }
}

impl RcsFile {
    pub fn head(&self) -> Result<&Num, Error> {
        self.admin.head.as_ref().ok_or(Error::NoHead)
    }

    pub fn default_branch(&self) -> Option<&Num> {
        self.admin.branch.as_ref()
    }

    pub fn symbols(&self) -> &HashMap<Vec<u8>, Num> {
        &self.admin.symbols
    }

    /// The file's keyword substitution mode. An absent or unparseable expand
    /// phrase means the `kv` default.
    pub fn kmode(&self) -> KeywordMode {
        self.admin
            .expand
            .as_deref()
            .and_then(KeywordMode::from_flags)
            .unwrap_or_default()
    }

    pub fn delta(&self, rev: &Num) -> Result<&Delta, Error> {
        self.deltas
            .get(rev)
            .ok_or_else(|| Error::UnknownRevision(rev.to_string()))
    }

    pub fn text(&self, rev: &Num) -> Result<&DeltaText, Error> {
        self.texts
            .get(rev)
            .ok_or_else(|| Error::UnknownRevision(rev.to_string()))
    }

    /// The log message of a revision.
    pub fn log(&self, rev: &Num) -> Result<&[u8], Error> {
        Ok(&self.text(rev)?.log)
    }

    /// The user holding a lock on `rev`, if any.
    pub fn locker(&self, rev: &Num) -> Option<&[u8]> {
        self.admin
            .locks
            .iter()
            .find(|(_, locked)| *locked == rev)
            .map(|(user, _)| user.as_slice())
    }
}
