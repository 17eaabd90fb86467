#![cfg(test)]

use std::cmp::Ordering;

use crate::plugin_system::version::{
    PluginVersion, ReleaseChannel, VersionBump, VersionRange,
};

fn v(s: &str) -> PluginVersion {
    PluginVersion::parse(s).unwrap()
}

#[test]
fn parse_accepts_full_semver() {
    let version = v("1.2.3-beta.1+build.5");
    assert_eq!(version.major(), 1);
    assert_eq!(version.minor(), 2);
    assert_eq!(version.patch(), 3);
    assert_eq!(version.prerelease(), Some("beta.1"));
    assert_eq!(version.build(), Some("build.5"));
}

#[test]
fn parse_rejects_garbage() {
    assert!(PluginVersion::parse("not-a-version").is_err());
    assert!(PluginVersion::parse("1.2").is_err());
    assert!(PluginVersion::parse("").is_err());
}

#[test]
fn compare_ignores_build_metadata() {
    assert_eq!(v("1.0.0+a").compare(&v("1.0.0+b")), Ordering::Equal);
    assert_eq!(v("1.0.0+a"), v("1.0.0"));
}

#[test]
fn release_outranks_prerelease() {
    assert_eq!(v("1.0.0").compare(&v("1.0.0-rc.1")), Ordering::Greater);
}

#[test]
fn prerelease_precedence_is_fieldwise() {
    // Numeric identifiers rank below alphanumeric ones.
    assert_eq!(v("1.0.0-1").compare(&v("1.0.0-alpha")), Ordering::Less);
    // Shorter prerelease is lower when prefixes match.
    assert_eq!(v("1.0.0-alpha").compare(&v("1.0.0-alpha.1")), Ordering::Less);
    assert_eq!(v("1.0.0-alpha.1").compare(&v("1.0.0-alpha.2")), Ordering::Less);
    assert_eq!(v("1.0.0-alpha.2").compare(&v("1.0.0-beta")), Ordering::Less);
}

#[test]
fn compare_is_a_total_order() {
    let versions = [
        v("0.1.0"),
        v("1.0.0-alpha"),
        v("1.0.0-alpha.1"),
        v("1.0.0-beta"),
        v("1.0.0"),
        v("1.0.1"),
        v("1.1.0"),
        v("2.0.0"),
    ];
    // Antisymmetry and transitivity over every triple.
    for a in &versions {
        for b in &versions {
            let ab = a.compare(b);
            assert_eq!(b.compare(a), ab.reverse());
            for c in &versions {
                if ab != Ordering::Greater && b.compare(c) != Ordering::Greater {
                    assert_ne!(a.compare(c), Ordering::Greater);
                }
            }
        }
    }
}

#[test]
fn exact_range_matches_itself() {
    for s in ["0.1.0", "1.0.0", "1.2.3-beta.1", "10.20.30"] {
        let version = v(s);
        let range = VersionRange::exact(&version);
        assert!(version.satisfies(&range), "{} should satisfy ={}", s, s);
    }
}

#[test]
fn range_grammar_operators() {
    let cases = [
        ("=1.2.3", "1.2.3", true),
        ("=1.2.3", "1.2.4", false),
        ("= 1.2.3", "1.2.3", true),
        (">1.0.0", "1.0.1", true),
        (">1.0.0", "1.0.0", false),
        (">=1.0.0", "1.0.0", true),
        ("<2.0.0", "1.9.9", true),
        ("<2.0.0", "2.0.0", false),
        ("<=2.0.0", "2.0.0", true),
        ("^1.2.3", "1.9.0", true),
        ("^1.2.3", "2.0.0", false),
        ("^1.2.3", "1.2.2", false),
        ("~1.2.3", "1.2.9", true),
        ("~1.2.3", "1.3.0", false),
    ];
    for (range, version, expected) in cases {
        let range_parsed = VersionRange::parse(range).unwrap();
        assert_eq!(
            v(version).satisfies(&range_parsed),
            expected,
            "{} vs {}",
            version,
            range
        );
    }
}

#[test]
fn range_conjunction_requires_all() {
    let range = VersionRange::parse(">=1.0.0 <2.0.0").unwrap();
    assert!(v("1.5.0").satisfies(&range));
    assert!(!v("0.9.0").satisfies(&range));
    assert!(!v("2.0.0").satisfies(&range));
}

#[test]
fn invalid_ranges_are_rejected() {
    assert!(VersionRange::parse("").is_err());
    assert!(VersionRange::parse(">=").is_err());
    assert!(VersionRange::parse("^banana").is_err());
}

#[test]
fn latest_picks_highest_precedence() {
    let versions = vec![v("1.0.0"), v("2.0.0-rc.1"), v("1.9.9"), v("2.0.0")];
    assert_eq!(PluginVersion::latest(&versions), Some(&v("2.0.0")));
    assert_eq!(PluginVersion::latest(&[]), None);
}

#[test]
fn classification() {
    assert_eq!(v("0.3.1").classify(), ReleaseChannel::InitialDevelopment);
    assert_eq!(v("1.0.0-alpha.2").classify(), ReleaseChannel::Alpha);
    assert_eq!(v("2.1.0-beta").classify(), ReleaseChannel::Beta);
    assert_eq!(v("1.0.0-rc.1").classify(), ReleaseChannel::ReleaseCandidate);
    assert_eq!(v("1.0.0-nightly.5").classify(), ReleaseChannel::Prerelease);
    assert_eq!(v("0.9.0-dev").classify(), ReleaseChannel::PreRelease);
    assert_eq!(v("3.2.1").classify(), ReleaseChannel::Stable);
}

#[test]
fn increments() {
    assert_eq!(v("1.2.3").increment(VersionBump::Major, None), v("2.0.0"));
    assert_eq!(v("1.2.3").increment(VersionBump::Minor, None), v("1.3.0"));
    assert_eq!(v("1.2.3").increment(VersionBump::Patch, None), v("1.2.4"));
    // A prerelease promotes on a patch bump.
    assert_eq!(v("1.2.3-rc.1").increment(VersionBump::Patch, None), v("1.2.3"));
}

#[test]
fn prerelease_increments() {
    assert_eq!(
        v("1.2.3").increment(VersionBump::Prerelease, Some("beta")),
        v("1.2.4-beta.0")
    );
    assert_eq!(
        v("1.2.4-beta.0").increment(VersionBump::Prerelease, None),
        v("1.2.4-beta.1")
    );
    // Switching identifiers restarts the sequence.
    assert_eq!(
        v("1.2.4-alpha.3").increment(VersionBump::Prerelease, Some("rc")),
        v("1.2.4-rc.0")
    );
    assert_eq!(
        v("1.0.0").increment(VersionBump::Prerelease, None),
        v("1.0.1-0")
    );
}

#[test]
fn is_prerelease() {
    assert!(v("1.0.0-alpha").is_prerelease());
    assert!(!v("1.0.0").is_prerelease());
}
