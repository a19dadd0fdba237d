//! The RCS ",v" byte grammar.
//!
//! Productions follow rcsfile(5): an admin block, the delta headers, the
//! description, then the delta texts. Unknown newphrases are skipped so that
//! files written by CVSNT and friends still parse.

use std::collections::HashMap;

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{multispace0, multispace1},
    combinator::{map, opt, verify},
    multi::{fold_many0, many0},
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};

use crate::types::{Admin, Delta, DeltaText, RcsFile};
use crate::Num;

mod char;
use self::char::is_idchar;

mod scalar;
use self::scalar::*;

pub(crate) fn file(input: &[u8]) -> IResult<&[u8], RcsFile> {
    map(
        tuple((
            delimited(multispace0, admin, multispace0),
            many0(terminated(delta, multispace0)),
            terminated(desc, multispace0),
            many0(terminated(delta_text, multispace0)),
        )),
        |(admin, deltas, desc, texts)| RcsFile {
            admin,
            deltas: deltas.into_iter().collect(),
            desc,
            texts: texts.into_iter().collect(),
        },
    )(input)
}

fn phrase_end(input: &[u8]) -> IResult<&[u8], ()> {
    map(tuple((multispace0, tag(b";"), multispace0)), |_| ())(input)
}

fn opt_num_phrase<'a>(
    keyword: &'static [u8],
) -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], Option<Num>> {
    delimited(pair(tag(keyword), multispace0), opt(num), phrase_end)
}

fn string_phrase<'a>(
    keyword: &'static [u8],
) -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], Vec<u8>> {
    delimited(pair(tag(keyword), multispace0), string, phrase_end)
}

fn admin(input: &[u8]) -> IResult<&[u8], Admin> {
    let (input, head) = opt_num_phrase(b"head")(input)?;
    let (input, branch) = map(opt(opt_num_phrase(b"branch")), Option::flatten)(input)?;
    let (input, access) = delimited(
        tag(b"access"),
        many0(preceded(multispace1, id)),
        phrase_end,
    )(input)?;
    let (input, symbols) = delimited(
        tag(b"symbols"),
        fold_many0(
            separated_pair(
                delimited(multispace0, sym, multispace0),
                tag(b":"),
                delimited(multispace0, num, multispace0),
            ),
            HashMap::new,
            |mut acc, (name, rev)| {
                acc.insert(name, rev);
                acc
            },
        ),
        phrase_end,
    )(input)?;
    let (input, locks) = delimited(
        tag(b"locks"),
        fold_many0(
            separated_pair(
                delimited(multispace0, id, multispace0),
                tag(b":"),
                delimited(multispace0, num, multispace0),
            ),
            HashMap::new,
            |mut acc, (user, rev)| {
                acc.insert(user, rev);
                acc
            },
        ),
        phrase_end,
    )(input)?;
    let (input, strict) = map(opt(pair(tag(b"strict"), phrase_end)), |s| s.is_some())(input)?;
    let (input, _integrity) = opt(string_phrase(b"integrity"))(input)?;
    let (input, comment) = opt(string_phrase(b"comment"))(input)?;
    let (input, expand) = opt(string_phrase(b"expand"))(input)?;
    let (input, _) = newphrases(input)?;

    Ok((
        input,
        Admin {
            head,
            branch,
            access,
            symbols,
            locks,
            strict,
            comment,
            expand,
        },
    ))
}

fn delta(input: &[u8]) -> IResult<&[u8], (Num, Delta)> {
    let (input, revnum) = terminated(num, multispace1)(input)?;
    let (input, date) = delimited(pair(tag(b"date"), multispace1), delta_date, phrase_end)(input)?;
    let (input, author) = delimited(pair(tag(b"author"), multispace1), id, phrase_end)(input)?;
    let (input, state) = delimited(pair(tag(b"state"), multispace0), opt(id), phrase_end)(input)?;
    let (input, branches) = delimited(
        tag(b"branches"),
        many0(preceded(multispace1, num)),
        phrase_end,
    )(input)?;
    let (input, next) = delimited(pair(tag(b"next"), multispace0), opt(num), phrase_end)(input)?;
    let (input, commit_id) = opt(delimited(
        pair(tag(b"commitid"), multispace1),
        sym,
        phrase_end,
    ))(input)?;
    let (input, _) = newphrases(input)?;

    Ok((
        input,
        (
            revnum,
            Delta {
                date,
                author,
                state,
                branches,
                next,
                commit_id,
            },
        ),
    ))
}

fn desc(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    preceded(pair(tag(b"desc"), multispace1), string)(input)
}

fn delta_text(input: &[u8]) -> IResult<&[u8], (Num, DeltaText)> {
    let (input, revnum) = terminated(num, multispace1)(input)?;
    let (input, log) = preceded(pair(tag(b"log"), multispace1), string)(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = newphrases(input)?;
    let (input, text) = preceded(pair(tag(b"text"), multispace1), string)(input)?;

    Ok((input, (revnum, DeltaText { log, text })))
}

/// Skips a run of newphrases: `word value... ;` extension fields this reader
/// has no use for, such as CVSNT's `permissions` or `mergepoint`.
fn newphrases(input: &[u8]) -> IResult<&[u8], ()> {
    map(many0(newphrase), |_| ())(input)
}

fn newphrase(input: &[u8]) -> IResult<&[u8], ()> {
    let (input, _word) = verify(take_while1(is_idchar), |w: &[u8]| {
        w[0].is_ascii_alphabetic() && w != b"desc".as_ref() && w != b"text".as_ref()
    })(input)?;
    let (input, _) = many0(preceded(
        multispace0,
        alt((
            map(string, |_| ()),
            map(
                take_while1(|c: u8| c != b';' && c != b'@' && !c.is_ascii_whitespace()),
                |_| (),
            ),
        )),
    ))(input)?;
    phrase_end(input)
}
