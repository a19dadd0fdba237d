use std::convert::TryFrom;

use chrono::{DateTime, Utc};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_till1, take_while1},
    combinator::{map, map_res, value},
    multi::fold_many0,
    sequence::delimited,
    IResult,
};

use super::char::*;
use crate::{date, Num};

/// An identifier: a run of id characters, dots allowed.
pub(super) fn id(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    map(take_while1(|c| is_idchar(c) || c == b'.'), Vec::from)(input)
}

/// A symbolic name: like an identifier, but without dots.
pub(super) fn sym(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    map(take_while1(is_idchar), Vec::from)(input)
}

/// A revision or branch number.
pub(super) fn num(input: &[u8]) -> IResult<&[u8], Num> {
    map_res(take_while1(is_numchar), Num::try_from)(input)
}

/// An RCS delta date: dotted `[YY]YY.MM.DD.HH.MM.SS`.
pub(super) fn delta_date(input: &[u8]) -> IResult<&[u8], DateTime<Utc>> {
    map_res(take_while1(is_numchar), |bytes: &[u8]| {
        let fields = std::str::from_utf8(bytes)
            .map_err(|_| crate::Error::InvalidDate(String::from_utf8_lossy(bytes).into_owned()))?
            .split('.')
            .map(|part| part.parse::<u32>())
            .collect::<Result<Vec<u32>, _>>()
            .map_err(|_| crate::Error::InvalidDate(String::from_utf8_lossy(bytes).into_owned()))?;

        if fields.len() != 6 {
            return Err(crate::Error::InvalidDate(
                String::from_utf8_lossy(bytes).into_owned(),
            ));
        }

        date::timestamp(
            fields[0] as i32,
            fields[1],
            fields[2],
            fields[3],
            fields[4],
            fields[5],
        )
    })(input)
}

fn string_literal(input: &[u8]) -> IResult<&[u8], &[u8]> {
    take_till1(|c| c == b'@')(input)
}

fn string_escape(input: &[u8]) -> IResult<&[u8], &[u8]> {
    value(&b"@"[..], tag(b"@@"))(input)
}

/// An `@`-delimited string, with `@@` as the escape for a literal `@`.
pub(super) fn string(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    delimited(
        tag(b"@"),
        fold_many0(
            alt((string_literal, string_escape)),
            Vec::new,
            |mut v, fragment| {
                v.extend_from_slice(fragment);
                v
            },
        ),
        tag(b"@"),
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string() {
        assert_eq!(string(b"@@").unwrap().1, b"");
        assert_eq!(string(b"@foo bar@").unwrap().1, b"foo bar");
        assert_eq!(string(b"@foo@@bar@").unwrap().1, b"foo@bar");
        assert_eq!(string(b"@multi\nline@").unwrap().1, b"multi\nline");
    }

    #[test]
    fn test_num() {
        assert_eq!(num(b"1.2.4.3;").unwrap().1.to_string(), "1.2.4.3");
        assert!(num(b";").is_err());
    }

    #[test]
    fn test_delta_date() {
        let (_, when) = delta_date(b"2021.08.11.19.08.27;").unwrap();
        assert_eq!(when.timestamp(), 1628708907);

        // Two-digit years are pre-2000 RCS dates.
        let (_, when) = delta_date(b"98.03.01.12.00.00;").unwrap();
        assert_eq!(
            when,
            crate::date::timestamp(1998, 3, 1, 12, 0, 0).unwrap()
        );

        assert!(delta_date(b"2021.08.11;").is_err());
    }
}
