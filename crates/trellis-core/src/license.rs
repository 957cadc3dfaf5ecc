//! Coarse license classification from raw registry license strings

use serde::{Deserialize, Serialize};

/// License family a raw license string maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LicenseClass {
    Apache,
    Isc,
    Mit,
    Bsd,
    Wtfpl,
    PublicDomain,
    Mpl,
    Lgpl,
    Gpl,
    CcBySa,
    Cc,
}

/// Substring lookup tiers. Many raw strings name several (often
/// conflicting) licenses; the least restrictive match takes precedence,
/// so the permissive tiers come first.
///
/// "mpl" as a bare token would also match words like "simple" and
/// "example", hence the "mozilla" spelling.
const LICENSE_TIERS: &[&[(&str, LicenseClass)]] = &[
    // permissive
    &[
        ("apache", LicenseClass::Apache),
        ("isc", LicenseClass::Isc),
        ("mit", LicenseClass::Mit),
        ("bsd", LicenseClass::Bsd),
        ("wtf", LicenseClass::Wtfpl),
        // "public" alone would swallow "General Public License"
        ("public domain", LicenseClass::PublicDomain),
        ("unlicense", LicenseClass::PublicDomain),
    ],
    // somewhat restrictive
    &[("mozilla", LicenseClass::Mpl)],
    // somewhat permissive
    &[
        ("lesser", LicenseClass::Lgpl),
        ("lgpl", LicenseClass::Lgpl),
    ],
    // strong copyleft
    &[
        ("general public", LicenseClass::Gpl),
        ("gpl", LicenseClass::Gpl),
        ("affero", LicenseClass::Gpl),
        ("cc-by-sa", LicenseClass::CcBySa),
    ],
    // permissive again
    &[
        ("cc-by", LicenseClass::Cc),
        ("creative", LicenseClass::Cc),
    ],
];

/// Classify a raw license string into a [`LicenseClass`].
///
/// Returns `None` when no known token matches.
pub fn classify(raw: &str) -> Option<LicenseClass> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let lowered = raw.to_lowercase();
    for tier in LICENSE_TIERS {
        for (token, class) in *tier {
            if lowered.contains(token) {
                return Some(*class);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_licenses() {
        assert_eq!(classify("MIT"), Some(LicenseClass::Mit));
        assert_eq!(classify("Apache License 2.0"), Some(LicenseClass::Apache));
        assert_eq!(classify("BSD-3-Clause"), Some(LicenseClass::Bsd));
        assert_eq!(classify("GNU General Public License v3"), Some(LicenseClass::Gpl));
        assert_eq!(classify("Mozilla Public License 2.0"), Some(LicenseClass::Mpl));
    }

    #[test]
    fn permissive_match_wins_over_copyleft() {
        // Dual-licensed strings resolve to the least restrictive option.
        assert_eq!(classify("GPL-3.0 OR MIT"), Some(LicenseClass::Mit));
        assert_eq!(classify("LGPL with BSD parts"), Some(LicenseClass::Bsd));
    }

    #[test]
    fn lesser_gpl_is_not_gpl() {
        assert_eq!(classify("GNU Lesser General Public License"), Some(LicenseClass::Lgpl));
    }

    #[test]
    fn unknown_strings_are_unclassified() {
        assert_eq!(classify(""), None);
        assert_eq!(classify("proprietary"), None);
        assert_eq!(classify("see LICENSE file"), None);
    }
}
