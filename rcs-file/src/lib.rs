//! Reader for RCS ",v" files: the byte grammar, revision reconstruction, and
//! keyword expansion.

use std::path::Path;

use nom::{combinator::all_consuming, Finish};

mod checkout;
pub mod date;
mod error;
pub mod keyword;
mod num;
mod parser;
pub mod script;
mod types;

pub use error::Error;
pub use num::Num;
pub use types::*;

/// Parses a full RCS file from memory.
pub fn parse(input: &[u8]) -> Result<RcsFile, Error> {
    Ok(Finish::finish(all_consuming(parser::file)(input))
        .map_err(|e| Error::Parse {
            offset: input.len() - e.input.len(),
            kind: e.code,
        })?
        .1)
}

impl RcsFile {
    /// Reads and parses the ",v" file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        parse(&std::fs::read(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reports_offset() {
        let input = b"head\t1.1;\naccess;\nsymbols;\nbogus from here";
        match parse(input) {
            Err(Error::Parse { offset, .. }) => assert!(offset > 0 && offset < input.len()),
            other => panic!("expected a parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_open_round_trip() {
        let dir = std::env::temp_dir().join("rcs-file-open-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("hello,v");
        std::fs::write(&path, include_bytes!("fixtures/hello,v").as_ref()).unwrap();

        let file = RcsFile::open(&path).unwrap();
        assert_eq!(file.head().unwrap().to_string(), "1.3");
        assert_eq!(file.kmode(), KeywordMode::KeywordValue);

        std::fs::remove_file(&path).unwrap();
    }
}
