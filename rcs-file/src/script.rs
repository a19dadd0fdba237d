//! RCS ed-script parsing and application.
//!
//! A delta text holds a script of `a LINE COUNT` and `d LINE COUNT` commands.
//! Line numbers are 1-based and refer to the buffer as it stood when the
//! script started, so application walks the source once with a copy-through
//! cursor rather than editing in place.

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::digit1,
    combinator::{map, map_res},
    sequence::tuple,
    Finish, IResult,
};

use crate::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add {
        position: usize,
        lines: Vec<Vec<u8>>,
    },
    Delete {
        position: usize,
        count: usize,
    },
}

/// Parses a full ed script into its command list.
pub fn parse_script(script: &[u8]) -> Result<Vec<Command>, Error> {
    let mut commands = Vec::new();
    let mut rest = script;
    let mut line = 1;

    while !rest.is_empty() {
        let (raw, remainder) = split_line(rest);
        rest = remainder;

        let (trailing, (kind, position, count)) = Finish::finish(command_line(strip_eol(raw)))
            .map_err(|_| Error::EditCommand { line })?;
        if !trailing.is_empty() {
            return Err(Error::EditCommand { line });
        }
        line += 1;

        match kind {
            b'a' => {
                let mut lines = Vec::with_capacity(count);
                for _ in 0..count {
                    if rest.is_empty() {
                        return Err(Error::EditPayload {
                            have: lines.len(),
                            want: count,
                        });
                    }
                    let (payload, remainder) = split_line(rest);
                    rest = remainder;
                    line += 1;
                    lines.push(payload.to_vec());
                }
                commands.push(Command::Add { position, lines });
            }
            _ => commands.push(Command::Delete { position, count }),
        }
    }

    Ok(commands)
}

/// Splits off one line, keeping its trailing newline with the line. The last
/// line of a script may have no newline at all.
fn split_line(input: &[u8]) -> (&[u8], &[u8]) {
    match input.iter().position(|&c| c == b'\n') {
        Some(idx) => input.split_at(idx + 1),
        None => (input, &input[input.len()..]),
    }
}

fn strip_eol(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\n").unwrap_or(line)
}

fn command_line(input: &[u8]) -> IResult<&[u8], (u8, usize, usize)> {
    map(
        tuple((
            alt((tag(b"a"), tag(b"d"))),
            digit1_usize,
            tag(b" "),
            digit1_usize,
        )),
        |(kind, position, _, count): (&[u8], usize, &[u8], usize)| (kind[0], position, count),
    )(input)
}

fn digit1_usize(input: &[u8]) -> IResult<&[u8], usize> {
    map_res(digit1, |digits: &[u8]| {
        // digit1 guarantees ASCII digits; overflow still fails the parse.
        std::str::from_utf8(digits)
            .map_err(|_| ())
            .and_then(|digits| digits.parse().map_err(|_| ()))
    })(input)
}

/// A revision's contents as a list of lines.
///
/// Every line keeps its own trailing `\n`; the final line may lack one, and
/// that distinction survives reconstruction byte for byte.
#[derive(Debug, Clone, Default)]
pub struct LineBuffer {
    lines: Vec<Vec<u8>>,
}

impl LineBuffer {
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            lines: bytes
                .split_inclusive(|&c| c == b'\n')
                .map(Vec::from)
                .collect(),
        }
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Applies an ed script to the buffer.
    ///
    /// Commands arrive in ascending line order, as RCS emits them; a command
    /// that reaches behind the cursor or past the end of the source is an
    /// error rather than a panic.
    pub fn apply(&mut self, commands: &[Command]) -> Result<(), Error> {
        let src = std::mem::take(&mut self.lines);
        let total = src.len();
        let mut it = src.into_iter();
        let mut out: Vec<Vec<u8>> = Vec::with_capacity(total);
        let mut consumed = 0usize;

        for command in commands {
            match command {
                Command::Delete { position, count } => {
                    if *position < 1 || position - 1 < consumed || position - 1 + count > total {
                        return Err(Error::EditOutOfRange {
                            command: format!("d{} {}", position, count),
                            lines: total,
                        });
                    }
                    out.extend(it.by_ref().take(position - 1 - consumed));
                    for _ in 0..*count {
                        it.next();
                    }
                    consumed = position - 1 + count;
                }
                Command::Add { position, lines } => {
                    if *position < consumed || *position > total {
                        return Err(Error::EditOutOfRange {
                            command: format!("a{} {}", position, lines.len()),
                            lines: total,
                        });
                    }
                    out.extend(it.by_ref().take(position - consumed));
                    consumed = *position;
                    out.extend(lines.iter().cloned());
                }
            }
        }

        out.extend(it);
        self.lines = out;

        Ok(())
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        self.lines.concat()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.lines.concat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let commands = parse_script(b"d2 1\na2 1\ntwo\na4 1\nfive\n").unwrap();
        assert_eq!(
            commands,
            vec![
                Command::Delete {
                    position: 2,
                    count: 1
                },
                Command::Add {
                    position: 2,
                    lines: vec![b"two\n".to_vec()]
                },
                Command::Add {
                    position: 4,
                    lines: vec![b"five\n".to_vec()]
                },
            ]
        );

        assert!(parse_script(b"").unwrap().is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_script(b"c1 2\n"),
            Err(Error::EditCommand { line: 1 })
        ));
        assert!(matches!(
            parse_script(b"a1 3\nonly one\n"),
            Err(Error::EditPayload { have: 1, want: 3 })
        ));
    }

    #[test]
    fn test_apply() {
        let mut buf = LineBuffer::new(b"one\ntwo changed\nthree\nfour\n");
        buf.apply(&parse_script(b"d2 1\na2 1\ntwo\na4 1\nfive\n").unwrap())
            .unwrap();
        assert_eq!(buf.as_bytes(), b"one\ntwo\nthree\nfour\nfive\n");
    }

    #[test]
    fn test_apply_insert_at_top() {
        let mut buf = LineBuffer::new(b"b\n");
        buf.apply(&parse_script(b"a0 1\na\n").unwrap()).unwrap();
        assert_eq!(buf.as_bytes(), b"a\nb\n");
    }

    #[test]
    fn test_apply_out_of_range() {
        let mut buf = LineBuffer::new(b"one\n");
        assert!(matches!(
            buf.apply(&parse_script(b"d2 3\n").unwrap()),
            Err(Error::EditOutOfRange { .. })
        ));
    }

    #[test]
    fn test_missing_trailing_newline() {
        let buf = LineBuffer::new(b"one\ntwo");
        assert_eq!(buf.line_count(), 2);
        assert_eq!(buf.into_bytes(), b"one\ntwo");

        let mut buf = LineBuffer::new(b"one\ntwo");
        buf.apply(&parse_script(b"d2 1\n").unwrap()).unwrap();
        assert_eq!(buf.into_bytes(), b"one\n");
    }
}
