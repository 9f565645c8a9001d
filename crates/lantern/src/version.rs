//! Interpreter versions and the registry of module-file magic numbers.
//!
//! Every compiled module starts with a two-byte magic number that identifies the
//! bytecode format it was written in. Only the magics that introduced a *breaking*
//! change to the module encoding or the instruction set are registered here; a
//! file's version is the marker of the greatest registered magic that does not
//! exceed the file's own magic.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Release level of an interpreter version.
///
/// Variants are declared in release order so the derived `Ord` gives
/// `Alpha < Beta < Candidate < Final`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum ReleaseLevel {
    Alpha,
    Beta,
    Candidate,
    Final,
}

impl ReleaseLevel {
    /// Suffix used in the short version form (`3.6.0a2`, `3.10.0rc1`).
    #[must_use]
    pub fn short(self) -> &'static str {
        match self {
            Self::Alpha => "a",
            Self::Beta => "b",
            Self::Candidate => "rc",
            Self::Final => "",
        }
    }
}

/// An interpreter version, ordered lexicographically over all five fields.
///
/// Field order matters: the derived `Ord` compares `major`, then `minor`,
/// `micro`, `release` and finally `serial`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub micro: u8,
    pub release: ReleaseLevel,
    pub serial: u8,
}

impl Version {
    /// A final release.
    #[must_use]
    pub const fn new(major: u8, minor: u8, micro: u8) -> Self {
        Self {
            major,
            minor,
            micro,
            release: ReleaseLevel::Final,
            serial: 0,
        }
    }

    /// A pre-release (or final release with an explicit serial).
    #[must_use]
    pub const fn pre(major: u8, minor: u8, micro: u8, release: ReleaseLevel, serial: u8) -> Self {
        Self {
            major,
            minor,
            micro,
            release,
            serial,
        }
    }

    /// Whether instructions are fixed-width two byte words at this version.
    #[must_use]
    pub fn has_fixed_width_opcodes(self) -> bool {
        self >= FIXED_WIDTH_OPCODES
    }

    /// Whether jump operands count instruction slots rather than bytes.
    #[must_use]
    pub fn jumps_by_instruction(self) -> bool {
        self >= JUMP_BY_OFFSET
    }

    /// Whether `MAKE_FUNCTION` expects a qualified name on top of the stack.
    #[must_use]
    pub fn has_qualified_names(self) -> bool {
        self >= QUALIFIED_NAMES
    }

    /// Whether code objects carry a `posonlyargcount` field.
    #[must_use]
    pub fn has_posonly_field(self) -> bool {
        self >= POSITIONAL_ONLY_PARAMS
    }

    /// Size of the module header preceding the serialized object graph.
    ///
    /// Magic and sentinel, then mtime; 3.3 adds the source size and
    /// deterministic builds a flags word before the mtime.
    #[must_use]
    pub fn header_len(self) -> usize {
        if self >= DETERMINISTIC_PYC {
            16
        } else if self >= SOURCE_SIZE_HEADER {
            12
        } else {
            8
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)?;
        if self.release != ReleaseLevel::Final {
            write!(f, "{}{}", self.release.short(), self.serial)?;
        }
        Ok(())
    }
}

/// Error returned when a version string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseVersionError(String);

impl fmt::Display for ParseVersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid version: {:?}", self.0)
    }
}

impl std::error::Error for ParseVersionError {}

impl FromStr for Version {
    type Err = ParseVersionError;

    /// Parses the short form produced by `Display`, e.g. `3.10.0b1` or `3.8.2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseVersionError(s.to_owned());
        let mut parts = s.splitn(3, '.');
        let major = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
        let minor = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
        let rest = parts.next().unwrap_or("0");
        let digits_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let micro = rest[..digits_end].parse().map_err(|_| err())?;
        let suffix = &rest[digits_end..];
        if suffix.is_empty() {
            return Ok(Self::new(major, minor, micro));
        }
        let (release, serial) = if let Some(serial) = suffix.strip_prefix("rc") {
            (ReleaseLevel::Candidate, serial)
        } else if let Some(serial) = suffix.strip_prefix('a') {
            (ReleaseLevel::Alpha, serial)
        } else if let Some(serial) = suffix.strip_prefix('b') {
            (ReleaseLevel::Beta, serial)
        } else {
            return Err(err());
        };
        let serial = serial.parse().map_err(|_| err())?;
        Ok(Self::pre(major, minor, micro, release, serial))
    }
}

/// The module header grows a source size word after the mtime.
pub const SOURCE_SIZE_HEADER: Version = Version::pre(3, 3, 0, ReleaseLevel::Alpha, 0);
/// `MAKE_FUNCTION` pops a qualified name above the code object (PEP 3155).
/// Lands in the same alpha as the header change.
pub const QUALIFIED_NAMES: Version = SOURCE_SIZE_HEADER;
/// Instructions become two byte words; `MAKE_FUNCTION` takes flag bits.
pub const FIXED_WIDTH_OPCODES: Version = Version::pre(3, 6, 0, ReleaseLevel::Alpha, 2);
/// The module header grows a flags word (PEP 552).
pub const DETERMINISTIC_PYC: Version = Version::pre(3, 7, 0, ReleaseLevel::Alpha, 4);
/// Code objects gain the `posonlyargcount` field (PEP 570).
pub const POSITIONAL_ONLY_PARAMS: Version = Version::pre(3, 8, 0, ReleaseLevel::Alpha, 1);
/// `from __future__ import annotations` becomes the default.
pub const ANNOTATIONS_IS_DEFAULT: Version = Version::pre(3, 10, 0, ReleaseLevel::Alpha, 1);
/// Function annotations are stored as a flat tuple of name/value pairs.
pub const ANNOTATIONS_USES_TUPLE: Version = Version::pre(3, 10, 0, ReleaseLevel::Alpha, 2);
/// Jump operands count instruction slots instead of bytes.
pub const JUMP_BY_OFFSET: Version = Version::pre(3, 10, 0, ReleaseLevel::Alpha, 7);
/// Postponed annotations are reverted to opt-in.
pub const ANNOTATIONS_IS_NOT_DEFAULT: Version = Version::pre(3, 10, 0, ReleaseLevel::Beta, 1);
/// First version whose bytecode is not understood: 3.11 replaces the
/// instruction set and adds exception tables to code objects.
pub const UNSUPPORTED: Version = Version::pre(3, 11, 0, ReleaseLevel::Alpha, 1);

/// Lowest magic number that identifies a 3.x module.
pub const MIN_MAGIC: u16 = 3000;
/// Magic numbers at or above this value are not 3.x modules.
pub const MAX_MAGIC: u16 = 4000;

/// Magic and version of the bytecode format this crate emits.
pub const NATIVE_MAGIC: u16 = 3439;
/// Version matching [`NATIVE_MAGIC`].
pub const NATIVE_VERSION: Version = Version::new(3, 10, 0);

/// Registered magics in ascending order.
pub const MAGIC_REGISTRY: &[(u16, Version)] = &[
    (3000, Version::new(3, 0, 0)),
    (3210, SOURCE_SIZE_HEADER),
    (3370, FIXED_WIDTH_OPCODES),
    (3392, DETERMINISTIC_PYC),
    (3410, POSITIONAL_ONLY_PARAMS),
    (3430, ANNOTATIONS_IS_DEFAULT),
    (3432, ANNOTATIONS_USES_TUPLE),
    (3435, JUMP_BY_OFFSET),
    (3437, ANNOTATIONS_IS_NOT_DEFAULT),
    (NATIVE_MAGIC, NATIVE_VERSION),
    (3450, UNSUPPORTED),
];

/// Returns the version marker for a module magic.
///
/// Returns `None` for magics outside `MIN_MAGIC..MAX_MAGIC`.
#[must_use]
pub fn version_for_magic(magic: u16) -> Option<Version> {
    if !(MIN_MAGIC..MAX_MAGIC).contains(&magic) {
        return None;
    }
    MAGIC_REGISTRY
        .iter()
        .take_while(|(registered, _)| *registered <= magic)
        .last()
        .map(|(_, version)| *version)
}

/// Returns the registered magic for an exact version marker.
#[must_use]
pub fn magic_for_version(version: Version) -> Option<u16> {
    MAGIC_REGISTRY
        .iter()
        .find(|(_, registered)| *registered == version)
        .map(|(magic, _)| *magic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_level_order() {
        assert!(ReleaseLevel::Alpha < ReleaseLevel::Beta);
        assert!(ReleaseLevel::Beta < ReleaseLevel::Candidate);
        assert!(ReleaseLevel::Candidate < ReleaseLevel::Final);
    }

    #[test]
    fn test_version_ordering_is_lexicographic() {
        assert!(Version::new(3, 6, 0) > FIXED_WIDTH_OPCODES);
        assert!(Version::pre(3, 10, 0, ReleaseLevel::Alpha, 7) < Version::pre(3, 10, 0, ReleaseLevel::Beta, 1));
        assert!(Version::new(3, 9, 9) < ANNOTATIONS_IS_DEFAULT);
        assert!(Version::pre(3, 10, 0, ReleaseLevel::Candidate, 1) < Version::new(3, 10, 0));
    }

    #[test]
    fn test_registry_is_sorted() {
        for pair in MAGIC_REGISTRY.windows(2) {
            assert!(pair[0].0 < pair[1].0);
            assert!(pair[0].1 < pair[1].1);
        }
    }

    #[test]
    fn test_version_for_magic_picks_greatest_lower_entry() {
        assert_eq!(version_for_magic(3000), Some(Version::new(3, 0, 0)));
        assert_eq!(version_for_magic(3180), Some(Version::new(3, 0, 0)));
        assert_eq!(version_for_magic(3209), Some(Version::new(3, 0, 0)));
        assert_eq!(version_for_magic(3210), Some(SOURCE_SIZE_HEADER));
        assert_eq!(version_for_magic(3230), Some(SOURCE_SIZE_HEADER));
        assert_eq!(version_for_magic(3379), Some(FIXED_WIDTH_OPCODES));
        assert_eq!(version_for_magic(3392), Some(DETERMINISTIC_PYC));
        assert_eq!(version_for_magic(3413), Some(POSITIONAL_ONLY_PARAMS));
        assert_eq!(version_for_magic(3439), Some(NATIVE_VERSION));
        assert_eq!(version_for_magic(3449), Some(NATIVE_VERSION));
        assert_eq!(version_for_magic(3495), Some(UNSUPPORTED));
        assert_eq!(version_for_magic(3550), Some(UNSUPPORTED));
    }

    #[test]
    fn test_version_for_magic_rejects_out_of_range() {
        assert_eq!(version_for_magic(62211), None);
        assert_eq!(version_for_magic(2999), None);
        assert_eq!(version_for_magic(4000), None);
    }

    #[test]
    fn test_display_and_parse() {
        assert_eq!(FIXED_WIDTH_OPCODES.to_string(), "3.6.0a2");
        assert_eq!(ANNOTATIONS_IS_NOT_DEFAULT.to_string(), "3.10.0b1");
        assert_eq!(Version::new(3, 8, 2).to_string(), "3.8.2");
        assert_eq!("3.10.0rc2".parse::<Version>().unwrap(), Version::pre(3, 10, 0, ReleaseLevel::Candidate, 2));
        assert_eq!("3.7".parse::<Version>().unwrap(), Version::new(3, 7, 0));
        assert!("three".parse::<Version>().is_err());
    }

    #[test]
    fn test_header_len() {
        assert_eq!(Version::new(3, 0, 0).header_len(), 8);
        assert_eq!(SOURCE_SIZE_HEADER.header_len(), 12);
        assert_eq!(Version::new(3, 6, 0).header_len(), 12);
        assert_eq!(DETERMINISTIC_PYC.header_len(), 16);
    }
}
