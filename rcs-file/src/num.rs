use std::{convert::TryFrom, fmt::Display, str::FromStr};

use itertools::Itertools;

use crate::Error;

/// A dotted RCS revision or branch number.
///
/// An even number of components identifies a revision; an odd number
/// identifies a branch. Magic branch stubs of the form `1.2.0.4` are
/// canonicalized on construction by dropping the penultimate zero, so `Num`
/// values compare and hash on their canonical form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Num(Vec<u32>);

impl Num {
    pub fn new(mut parts: Vec<u32>) -> Result<Self, Error> {
        if parts.is_empty() {
            return Err(Error::InvalidNum(String::new()));
        }

        if parts.len() >= 3 && parts[parts.len() - 2] == 0 {
            parts.remove(parts.len() - 2);
        }

        Ok(Self(parts))
    }

    pub fn parts(&self) -> &[u32] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_branch(&self) -> bool {
        self.0.len() % 2 == 1
    }

    /// True for `x.y` revisions directly on the trunk.
    pub fn is_trunk_revision(&self) -> bool {
        self.0.len() == 2
    }

    /// True for revisions on the `1.1.1` vendor branch.
    pub fn is_vendor_revision(&self) -> bool {
        self.0.len() == 4 && self.0[0] == 1 && self.0[1] == 1 && self.0[2] == 1
    }

    /// True for the initial vendor import `1.1.1.1`.
    pub fn is_initial_vendor(&self) -> bool {
        self.is_vendor_revision() && self.0[3] == 1
    }

    /// The branch this number lives on: all but the last component.
    pub fn branch_of(&self) -> Num {
        Num(self.0[..self.0.len() - 1].to_vec())
    }

    /// The first `n` components as a new number.
    pub fn truncated(&self, n: usize) -> Num {
        Num(self.0[..n].to_vec())
    }

    pub fn starts_with(&self, prefix: &Num) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }
}

impl FromStr for Num {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split('.')
            .map(|part| part.parse::<u32>())
            .collect::<Result<Vec<u32>, _>>()
            .map_err(|_| Error::InvalidNum(s.into()))?;

        Num::new(parts)
    }
}

impl TryFrom<&[u8]> for Num {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        std::str::from_utf8(value)
            .map_err(|_| Error::InvalidNum(String::from_utf8_lossy(value).into_owned()))?
            .parse()
    }
}

impl Display for Num {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.iter().map(|part| part.to_string()).join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(s: &str) -> Num {
        Num::from_str(s).unwrap()
    }

    #[test]
    fn test_parse() {
        assert_eq!(num("1.1").parts(), &[1, 1]);
        assert_eq!(num("1.2.4.3").parts(), &[1, 2, 4, 3]);
        assert!(Num::from_str("").is_err());
        assert!(Num::from_str("1..2").is_err());
        assert!(Num::from_str("1.x").is_err());
    }

    #[test]
    fn test_magic_branch() {
        // The penultimate zero marks a magic branch stub; it canonicalizes to
        // the real branch number.
        assert_eq!(num("1.2.0.4"), num("1.2.4"));
        assert!(num("1.2.0.4").is_branch());

        // A zero elsewhere is preserved.
        assert_eq!(num("1.0.2.4").parts(), &[1, 0, 2, 4]);
    }

    #[test]
    fn test_classification() {
        assert!(num("1.2").is_trunk_revision());
        assert!(!num("1.2.4.3").is_trunk_revision());
        assert!(num("1.1.1.1").is_vendor_revision());
        assert!(num("1.1.1.1").is_initial_vendor());
        assert!(num("1.1.1.2").is_vendor_revision());
        assert!(!num("1.1.1.2").is_initial_vendor());
        assert!(!num("1.1.2.1").is_vendor_revision());
    }

    #[test]
    fn test_branch_of() {
        assert_eq!(num("1.2.4.3").branch_of(), num("1.2.4"));
        assert_eq!(num("1.2").branch_of(), Num::new(vec![1]).unwrap());
    }

    #[test]
    fn test_display() {
        assert_eq!(num("1.2.4.3").to_string(), "1.2.4.3");
        assert_eq!(num("1.2.0.4").to_string(), "1.2.4");
    }
}
