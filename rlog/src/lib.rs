//! Parser for the textual history stream produced by `cvs rlog`.
//!
//! The stream is a sequence of per-file records separated by a line of 77 `=`
//! characters, with revision entries inside a record separated by a line of
//! 28 `-` characters. Parsing records the byte offset of every revision entry
//! so log messages can be re-read lazily from the (seekable) stream later.

use std::{
    collections::HashMap,
    io::{BufRead, Seek, SeekFrom},
};

use chrono::{DateTime, Datelike, Timelike, Utc};
use rcs_file::{date, Num};
use thiserror::Error;

const LOG_END_MARKER: &[u8] = &[b'='; 77];
const ENTRY_END_MARKER: &[u8] = &[b'-'; 28];

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("rlog reported an error for {path}: {message}")]
    Rlog { path: String, message: String },

    #[error("invalid revision number {0}")]
    InvalidRevision(String),

    #[error("invalid date {0}")]
    InvalidDate(String),

    #[error("no revision entry at offset {0}")]
    MissingEntry(u64),
}

/// The parsed history of one RCS file as reported by rlog.
#[derive(Debug, Clone)]
pub struct FileHistory {
    /// The raw `RCS file:` path, ending in ",v".
    pub path: Vec<u8>,
    /// The default branch, when one is set.
    pub branch: Option<Num>,
    pub symbols: HashMap<Vec<u8>, Num>,
    pub revisions: Vec<LogEntry>,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub rev: Num,
    pub date: DateTime<Utc>,
    pub author: Vec<u8>,
    pub state: Vec<u8>,
    pub commit_id: Option<Vec<u8>>,
    pub log: Vec<u8>,
    /// Byte offset of this entry's `revision` line in the stream.
    pub offset: u64,
}

/// Byte offsets of revision entries, keyed by raw RCS path and revision.
#[derive(Debug, Default)]
pub struct Offsets(HashMap<Vec<u8>, HashMap<Num, u64>>);

impl Offsets {
    fn record(&mut self, path: &[u8], rev: Num, offset: u64) {
        self.0.entry(path.to_vec()).or_default().insert(rev, offset);
    }

    pub fn get(&self, path: &[u8], rev: &Num) -> Option<u64> {
        self.0.get(path).and_then(|revs| revs.get(rev)).copied()
    }
}

/// What a header parse ended on.
enum Header {
    File {
        path: Vec<u8>,
        branch: Option<Num>,
        symbols: HashMap<Vec<u8>, Num>,
        has_revisions: bool,
    },
    EndOfLog,
}

/// What terminated a revision entry.
#[derive(Debug, PartialEq, Eq)]
enum Terminator {
    MoreEntries,
    EndOfFile,
    EndOfLog,
}

/// Parses the whole rlog stream, returning per-file histories and the offset
/// index. An rlog error line fails the parse; there is no per-file recovery.
pub fn parse<R: BufRead + Seek>(reader: &mut R) -> Result<(Vec<FileHistory>, Offsets), Error> {
    let mut histories = Vec::new();
    let mut offsets = Offsets::default();

    loop {
        let (path, branch, symbols, has_revisions) = match parse_header(reader)? {
            Header::EndOfLog => break,
            Header::File {
                path,
                branch,
                symbols,
                has_revisions,
            } => (path, branch, symbols, has_revisions),
        };

        let mut revisions = Vec::new();
        let mut truncated = false;

        if has_revisions {
            loop {
                let offset = reader.stream_position()?;
                let (entry, end) = parse_entry(reader, offset)?;
                if let Some(entry) = entry {
                    offsets.record(&path, entry.rev.clone(), offset);
                    revisions.push(entry);
                }
                match end {
                    Terminator::MoreEntries => continue,
                    Terminator::EndOfFile => break,
                    Terminator::EndOfLog => {
                        truncated = true;
                        break;
                    }
                }
            }
        }

        if truncated {
            // The stream ended mid-record; rlog always closes a record with
            // its marker line, so drop the partial record and stop.
            log::warn!(
                "rlog stream truncated inside {}",
                String::from_utf8_lossy(&path)
            );
            break;
        }

        log::trace!(
            "parsed {} revision(s) of {}",
            revisions.len(),
            String::from_utf8_lossy(&path)
        );
        histories.push(FileHistory {
            path,
            branch,
            symbols,
            revisions,
        });
    }

    Ok((histories, offsets))
}

/// Seeks to a recorded entry offset and re-reads just that entry's log
/// message.
pub fn getlog<R: BufRead + Seek>(
    reader: &mut R,
    offsets: &Offsets,
    path: &[u8],
    rev: &Num,
) -> Result<Vec<u8>, Error> {
    let offset = offsets
        .get(path, rev)
        .ok_or_else(|| Error::InvalidRevision(rev.to_string()))?;
    reader.seek(SeekFrom::Start(offset))?;

    match parse_entry(reader, offset)? {
        (Some(entry), _) => Ok(entry.log),
        _ => Err(Error::MissingEntry(offset)),
    }
}

fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<Vec<u8>>, Error> {
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line)?;
    if line.is_empty() {
        Ok(None)
    } else {
        Ok(Some(line))
    }
}

fn stripped(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn parse_num(bytes: &[u8]) -> Result<Num, Error> {
    use std::convert::TryFrom;
    Num::try_from(bytes).map_err(|_| Error::InvalidRevision(String::from_utf8_lossy(bytes).into()))
}

fn parse_header<R: BufRead>(reader: &mut R) -> Result<Header, Error> {
    #[derive(PartialEq)]
    enum State {
        Base,
        Symbols,
        Locks,
    }

    let mut path = Vec::new();
    let mut branch = None;
    let mut symbols = HashMap::new();
    let mut state = State::Base;

    loop {
        let line = match read_line(reader)? {
            Some(line) => line,
            None => return Ok(Header::EndOfLog),
        };
        let line = stripped(&line).to_vec();

        if state == State::Symbols {
            if line.starts_with(b"\t") {
                if let Some((name, rev)) = split_colon(&line) {
                    symbols.insert(name, parse_num(&rev)?);
                }
                continue;
            }
            state = State::Base;
        }

        if state == State::Locks {
            if line.starts_with(b"\t") {
                continue;
            }
            state = State::Base;
        }

        if line.starts_with(b"RCS file:") {
            path = line[9..].strip_prefix(b" ").unwrap_or(&line[9..]).to_vec();
        } else if line.starts_with(b"branch:") {
            let value = stripped(&line)[7..].to_vec();
            let value = value.strip_prefix(b" ").unwrap_or(&value);
            if !value.is_empty() {
                branch = Some(parse_num(value)?);
            }
        } else if line.starts_with(b"locks:") {
            state = State::Locks;
        } else if line.starts_with(b"symbolic names") {
            state = State::Symbols;
        } else if stripped(&line) == ENTRY_END_MARKER {
            return Ok(Header::File {
                path,
                branch,
                symbols,
                has_revisions: true,
            });
        } else if stripped(&line) == LOG_END_MARKER {
            return Ok(Header::File {
                path,
                branch,
                symbols,
                has_revisions: false,
            });
        } else if let Some((error_path, message)) = error_line(&line) {
            if message.starts_with(b"warning: Unknown phrases like ") {
                // Some RCS files carry extension fields rlog warns about;
                // they are harmless.
                continue;
            }
            return Err(Error::Rlog {
                path: String::from_utf8_lossy(&error_path).into_owned(),
                message: String::from_utf8_lossy(&message).into_owned(),
            });
        }
    }
}

fn split_colon(line: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
    let idx = line.iter().position(|&c| c == b':')?;
    let trim = |bytes: &[u8]| {
        let start = bytes.iter().position(|c| !c.is_ascii_whitespace())?;
        let end = bytes.iter().rposition(|c| !c.is_ascii_whitespace())?;
        Some(bytes[start..=end].to_vec())
    };
    Some((trim(&line[..idx])?, trim(&line[idx + 1..])?))
}

/// Matches `rlog: path,v: message` style error lines, including the prefixless
/// form some rlog builds emit on redirected stderr, and the CVSNT variants.
fn error_line(line: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
    if let Some(rest) = line
        .strip_prefix(b"cvs rcsfile: ")
        .or_else(|| line.strip_prefix(b"cvs [rcsfile aborted]: "))
    {
        // `path,v' message | cannot open path,v: message | path,v: message
        if let Some(rest) = rest.strip_prefix(b"`") {
            if let Some(idx) = find_subslice(rest, b",v' ") {
                return Some((rest[..idx + 2].to_vec(), rest[idx + 4..].to_vec()));
            }
        }
        let rest = rest.strip_prefix(b"cannot open ").unwrap_or(rest);
        if let Some((path, message)) = split_rcs_path(rest) {
            return Some((path, message));
        }
        return Some((Vec::new(), rest.to_vec()));
    }

    let mut rest = line;
    let mut prefixed = false;
    while let Some(r) = rest.strip_prefix(b"rlog: ") {
        rest = r;
        prefixed = true;
    }
    match split_rcs_path(rest) {
        Some((path, message)) if prefixed || !path.is_empty() => Some((path, message)),
        _ => None,
    }
}

/// Splits `path,v[:line]: message` at the `,v` boundary.
fn split_rcs_path(rest: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
    let idx = find_subslice(rest, b",v:")?;
    let path = rest[..idx + 2].to_vec();
    let mut after = &rest[idx + 3..];

    // An optional `:<digits>` line number follows the path in some builds.
    if let Some(end) = after.iter().position(|&c| c == b':') {
        if end > 0 && after[..end].iter().all(u8::is_ascii_digit) {
            after = &after[end + 1..];
        }
    }

    let message = after.strip_prefix(b" ").unwrap_or(after);
    Some((path, message.to_vec()))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_entry<R: BufRead>(
    reader: &mut R,
    offset: u64,
) -> Result<(Option<LogEntry>, Terminator), Error> {
    let line = match read_line(reader)? {
        Some(line) => line,
        None => return Ok((None, Terminator::EndOfLog)),
    };

    // Some RCS versions put an entry separator right before the closing
    // marker, so a marker can legitimately show up where an entry starts.
    if stripped(&line) == LOG_END_MARKER {
        return Ok((None, Terminator::EndOfFile));
    }

    let mut entry = None;
    if line.starts_with(b"revision") {
        let rev = stripped(&line)
            .split(|c| c.is_ascii_whitespace())
            .filter(|part| !part.is_empty())
            .nth(1)
            .map(parse_num)
            .transpose()?;

        let info = match read_line(reader)? {
            Some(line) => parse_info_line(stripped(&line)),
            None => return Ok((None, Terminator::EndOfLog)),
        };

        if let (Some(rev), Some(info)) = (rev, info) {
            entry = Some((rev, info));
        }
    }

    let mut log = Vec::new();
    let terminator = loop {
        let line = match read_line(reader)? {
            Some(line) => line,
            None => break Terminator::EndOfLog,
        };
        if line.starts_with(b"branches:") {
            continue;
        }
        if stripped(&line) == ENTRY_END_MARKER {
            break Terminator::MoreEntries;
        }
        if stripped(&line) == LOG_END_MARKER {
            break Terminator::EndOfFile;
        }
        log.extend_from_slice(&line);
    };

    Ok((
        entry.map(|(rev, (date, author, state, commit_id))| LogEntry {
            rev,
            date,
            author,
            state,
            commit_id,
            log,
            offset,
        }),
        terminator,
    ))
}

type InfoFields = (DateTime<Utc>, Vec<u8>, Vec<u8>, Option<Vec<u8>>);

fn parse_info_line(line: &[u8]) -> Option<InfoFields> {
    let mut date = None;
    let mut author = None;
    let mut state = None;
    let mut commit_id = None;

    for field in line.split(|&c| c == b';') {
        let field = std::str::from_utf8(field).ok()?.trim();
        if field.is_empty() {
            continue;
        }
        let (key, value) = match field.split_once(':') {
            Some(pair) => pair,
            None => continue,
        };
        let value = value.trim();

        match key {
            "date" => date = parse_date(value).ok(),
            "author" => author = Some(value.as_bytes().to_vec()),
            "state" => state = Some(value.as_bytes().to_vec()),
            "commitid" => commit_id = Some(value.as_bytes().to_vec()),
            _ => {}
        }
    }

    Some((date?, author?, state?, commit_id))
}

/// Parses the two date forms rlog emits: `YYYY/MM/DD HH:MM:SS` (UTC assumed)
/// and `YYYY-MM-DD HH:MM:SS ±ZZZZ`.
fn parse_date(value: &str) -> Result<DateTime<Utc>, Error> {
    if let Ok(when) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S %z") {
        let when = when.with_timezone(&Utc);
        return date::timestamp(
            when.year(),
            when.month(),
            when.day(),
            when.hour(),
            when.minute(),
            when.second(),
        )
        .map_err(|_| Error::InvalidDate(value.into()));
    }

    let naive = chrono::NaiveDateTime::parse_from_str(value, "%Y/%m/%d %H:%M:%S")
        .map_err(|_| Error::InvalidDate(value.into()))?;
    date::timestamp(
        naive.year(),
        naive.month(),
        naive.day(),
        naive.hour(),
        naive.minute(),
        naive.second(),
    )
    .map_err(|_| Error::InvalidDate(value.into()))
}
