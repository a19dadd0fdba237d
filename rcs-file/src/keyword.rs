//! RCS keyword expansion.
//!
//! Substitution follows the file's k-mode from the admin `expand` phrase.
//! The keyword table is the classic RCS set plus OpenBSD's `Mdocdate`;
//! anything else between dollar signs passes through untouched.

use std::{os::unix::prelude::OsStrExt, path::Path};

use chrono::{DateTime, Datelike, Utc};

use crate::{Error, KeywordMode, Num, RcsFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keyword {
    Author,
    Date,
    Header,
    Id,
    Locker,
    Log,
    Mdocdate,
    Name,
    RcsFile,
    Revision,
    Source,
    State,
}

fn lookup(name: &[u8]) -> Option<Keyword> {
    match name {
        b"Author" => Some(Keyword::Author),
        b"Date" => Some(Keyword::Date),
        b"Header" => Some(Keyword::Header),
        b"Id" => Some(Keyword::Id),
        b"Locker" => Some(Keyword::Locker),
        b"Log" => Some(Keyword::Log),
        b"Mdocdate" => Some(Keyword::Mdocdate),
        b"Name" => Some(Keyword::Name),
        b"RCSfile" => Some(Keyword::RcsFile),
        b"Revision" => Some(Keyword::Revision),
        b"Source" => Some(Keyword::Source),
        b"State" => Some(Keyword::State),
        _ => None,
    }
}

/// Returns the contents of `rev` with keywords substituted according to the
/// file's k-mode. `path` is the RCS file's path as it should appear in
/// `Source` and, reduced to its basename, in `RCSfile`, `Id` and `Log`.
pub fn expand(path: &Path, rcs: &RcsFile, rev: &Num) -> Result<Vec<u8>, Error> {
    let contents = rcs.checkout(rev)?;

    let mode = rcs.kmode();
    if matches!(mode, KeywordMode::Binary | KeywordMode::Old) {
        return Ok(contents);
    }

    let (with_name, with_value) = match mode {
        KeywordMode::KeywordOnly => (true, false),
        KeywordMode::ValueOnly => (false, true),
        _ => (true, true),
    };
    let with_locker = mode == KeywordMode::KeywordValueLocker;

    let delta = rcs.delta(rev)?;
    let ctx = Context {
        source: path.as_os_str().as_bytes(),
        basename: path
            .file_name()
            .map(|name| name.as_bytes())
            .unwrap_or_default(),
        rev: rev.to_string(),
        date: delta.date,
        author: &delta.author,
        state: delta.state.as_deref().unwrap_or(b"Exp"),
        locker: if with_locker { rcs.locker(rev) } else { None },
        log: rcs.log(rev)?,
    };

    let mut out = Vec::with_capacity(contents.len());
    for line in contents.split_inclusive(|&c| c == b'\n') {
        let mut log_insert = None;
        let mut i = 0;

        while i < line.len() {
            if line[i] != b'$' {
                out.push(line[i]);
                i += 1;
                continue;
            }

            match keyword_at(line, i) {
                Some((keyword, end)) => {
                    if with_name {
                        out.push(b'$');
                        out.extend_from_slice(keyword_name(keyword));
                        if with_value {
                            out.extend_from_slice(b": ");
                        }
                    }
                    if with_value {
                        ctx.push_value(keyword, &mut out);
                        if keyword == Keyword::Log {
                            log_insert = Some(ctx.log_entry(&line[..i]));
                        }
                    }
                    if with_name {
                        out.push(b'$');
                    }
                    i = end;
                }
                None => {
                    out.push(b'$');
                    i += 1;
                }
            }
        }

        if let Some(insert) = log_insert {
            out.extend_from_slice(&insert);
        }
    }

    Ok(out)
}

/// Tries to read a known keyword starting at the `$` at `line[i]`, in either
/// its unexpanded `$Kw$` or expanded `$Kw: value $` form. Returns the keyword
/// and the index just past the closing `$`.
fn keyword_at(line: &[u8], i: usize) -> Option<(Keyword, usize)> {
    let mut j = i + 1;
    while j < line.len() && line[j].is_ascii_alphanumeric() {
        j += 1;
    }

    let keyword = lookup(&line[i + 1..j])?;

    match line.get(j) {
        Some(b'$') => Some((keyword, j + 1)),
        Some(b':') => {
            let mut k = j + 1;
            while k < line.len() && line[k] != b'$' && line[k] != b'\n' {
                k += 1;
            }
            if line.get(k) == Some(&b'$') {
                Some((keyword, k + 1))
            } else {
                None
            }
        }
        _ => None,
    }
}

fn keyword_name(keyword: Keyword) -> &'static [u8] {
    match keyword {
        Keyword::Author => b"Author",
        Keyword::Date => b"Date",
        Keyword::Header => b"Header",
        Keyword::Id => b"Id",
        Keyword::Locker => b"Locker",
        Keyword::Log => b"Log",
        Keyword::Mdocdate => b"Mdocdate",
        Keyword::Name => b"Name",
        Keyword::RcsFile => b"RCSfile",
        Keyword::Revision => b"Revision",
        Keyword::Source => b"Source",
        Keyword::State => b"State",
    }
}

struct Context<'a> {
    source: &'a [u8],
    basename: &'a [u8],
    rev: String,
    date: DateTime<Utc>,
    author: &'a [u8],
    state: &'a [u8],
    locker: Option<&'a [u8]>,
    log: &'a [u8],
}

impl Context<'_> {
    fn push_value(&self, keyword: Keyword, out: &mut Vec<u8>) {
        let mut part = |bytes: &[u8]| {
            out.extend_from_slice(bytes);
            out.push(b' ');
        };

        match keyword {
            Keyword::Author => part(self.author),
            Keyword::Date => part(self.date_string().as_bytes()),
            Keyword::Header | Keyword::Id => {
                part(if keyword == Keyword::Header {
                    self.source
                } else {
                    self.basename
                });
                part(self.rev.as_bytes());
                part(self.date_string().as_bytes());
                part(self.author);
                part(self.state);
                if let Some(locker) = self.locker {
                    part(locker);
                }
            }
            Keyword::Locker => {
                if let Some(locker) = self.locker {
                    part(locker);
                }
            }
            Keyword::Log => part(self.basename),
            Keyword::Mdocdate => part(self.mdocdate_string().as_bytes()),
            // No symbolic name is in play during conversion.
            Keyword::Name => {}
            Keyword::RcsFile => part(self.basename),
            Keyword::Revision => part(self.rev.as_bytes()),
            Keyword::Source => part(self.source),
            Keyword::State => part(self.state),
        }
    }

    /// The log entry inserted below a `$Log$` line: a revision header and the
    /// message, each line carrying the prefix found before the keyword.
    fn log_entry(&self, prefix: &[u8]) -> Vec<u8> {
        let mut insert = Vec::new();

        insert.extend_from_slice(prefix);
        insert.extend_from_slice(b"Revision ");
        insert.extend_from_slice(self.rev.as_bytes());
        insert.extend_from_slice(b"  ");
        insert.extend_from_slice(self.date_string().as_bytes());
        insert.extend_from_slice(b"  ");
        insert.extend_from_slice(self.author);
        insert.push(b'\n');

        let trimmed: &[u8] = {
            let mut end = prefix.len();
            while end > 0 && prefix[end - 1].is_ascii_whitespace() {
                end -= 1;
            }
            &prefix[..end]
        };

        for line in self.log.split(|&c| c == b'\n') {
            if line.is_empty() {
                insert.extend_from_slice(trimmed);
            } else {
                insert.extend_from_slice(prefix);
                insert.extend_from_slice(line);
            }
            insert.push(b'\n');
        }

        // The trailing newline of the stored message would otherwise leave a
        // spurious prefix-only line behind.
        if self.log.ends_with(b"\n") {
            insert.truncate(insert.len() - trimmed.len() - 1);
        }

        insert
    }

    fn date_string(&self) -> String {
        self.date.format("%Y/%m/%d %H:%M:%S").to_string()
    }

    fn mdocdate_string(&self) -> String {
        format!(
            "{} {} {}",
            self.date.format("%B"),
            self.date.day(),
            self.date.year()
        )
    }
}
