//! Revision reconstruction.
//!
//! The head revision's text is stored verbatim. Every other trunk revision is
//! reached by applying reverse diffs while following `next` pointers from the
//! head; branch revisions are reached by descending through the `branches`
//! lists from the trunk ancestor and applying forward diffs.

use crate::{
    script::{self, LineBuffer},
    Error, Num, RcsFile,
};

impl RcsFile {
    /// Reconstructs the exact, unexpanded bytes of `rev`.
    pub fn checkout(&self, rev: &Num) -> Result<Vec<u8>, Error> {
        // Fail early on revisions the file has never heard of.
        self.delta(rev)?;

        let head = self.head()?.clone();
        let mut buf = LineBuffer::new(&self.text(&head)?.text);
        let mut cur = head;

        while cur != *rev {
            let delta = self.delta(&cur)?;

            let step = if rev.starts_with(&cur) {
                // `cur` is on the path to `rev` as a branch point; pick the
                // branch whose numbering leads there.
                delta
                    .branches
                    .iter()
                    .find(|b| {
                        rev.depth() >= b.depth()
                            && rev.parts()[..b.depth() - 1] == b.parts()[..b.depth() - 1]
                    })
                    .cloned()
            } else {
                delta.next.clone()
            };

            let step = step.ok_or_else(|| Error::UnknownRevision(rev.to_string()))?;
            buf.apply(&script::parse_script(&self.text(&step)?.text)?)?;
            cur = step;
        }

        Ok(buf.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use crate::parse;

    fn num(s: &str) -> crate::Num {
        s.parse().unwrap()
    }

    #[test]
    fn test_checkout_trunk() {
        let file = parse(include_bytes!("fixtures/hello,v")).unwrap();

        assert_eq!(
            file.checkout(&num("1.3")).unwrap(),
            b"one\ntwo changed\nthree\nfour\n"
        );
        assert_eq!(
            file.checkout(&num("1.2")).unwrap(),
            b"one\ntwo\nthree\nfour\nfive\n"
        );
        assert_eq!(file.checkout(&num("1.1")).unwrap(), b"one\ntwo\nthree\n");
    }

    #[test]
    fn test_checkout_branches() {
        let file = parse(include_bytes!("fixtures/hello,v")).unwrap();

        // The vendor import carries an empty diff against 1.1.
        assert_eq!(
            file.checkout(&num("1.1.1.1")).unwrap(),
            file.checkout(&num("1.1")).unwrap()
        );

        assert_eq!(
            file.checkout(&num("1.2.2.1")).unwrap(),
            b"ONE\ntwo\nthree\nfour\nfive\n"
        );
    }

    #[test]
    fn test_checkout_unknown_revision() {
        let file = parse(include_bytes!("fixtures/hello,v")).unwrap();
        assert!(matches!(
            file.checkout(&num("1.4")),
            Err(crate::Error::UnknownRevision(_))
        ));
    }

    #[test]
    fn test_log() {
        let file = parse(include_bytes!("fixtures/hello,v")).unwrap();
        assert_eq!(file.log(&num("1.2")).unwrap(), b"second\n");
        assert!(file.log(&num("9.9")).is_err());
    }
}
