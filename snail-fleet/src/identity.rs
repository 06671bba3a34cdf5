//! VM naming scheme.
//!
//! Fleet VMs carry their identity in their domain name:
//!
//! ```text
//! {prefix}-{distro}-{version}-{instance}     snail-test-ubuntu-24.04-2
//! {prefix}-{version}-{instance}              snail-test-42-7   (legacy)
//! ```
//!
//! Legacy names predate multi-distro support and imply the deployment's
//! default distribution. A name shaped like `{prefix}-{word}-{integer}` is
//! always read as legacy even when `{word}` is not a real version.
//!
//! Any other `{prefix}-{rest}` name still belongs to the fleet. It decodes
//! as [`NameForm::Unparsed`], keeps `rest` verbatim and sorts after every
//! parsed VM.

use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

/// Which naming form a VM name used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NameForm {
    /// `{prefix}-{distro}-{version}-{instance}`
    Modern,
    /// `{prefix}-{version}-{instance}`
    Legacy,
    /// `{prefix}-{rest}` where `rest` fits neither form
    Unparsed,
}

/// Identity decoded from a VM name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct VmIdentity {
    pub prefix: String,
    /// Effective distribution. For legacy names this is the configured default.
    pub distro: String,
    /// Version exactly as written in the name (e.g. "42", "24.04").
    /// Holds the whole suffix after the prefix for unparsed names.
    pub version: String,
    pub instance: u32,
    pub form: NameForm,
}

impl VmIdentity {
    /// Comparable key for the version segment.
    pub fn version_key(&self) -> u64 {
        version_key(&self.version)
    }

    pub fn is_parsed(&self) -> bool {
        self.form != NameForm::Unparsed
    }

    /// Key the fleet is ordered by (descending). Unparsed names get the
    /// lowest key.
    pub fn sort_key(&self) -> (&str, u64, u32) {
        match self.form {
            NameForm::Unparsed => ("", 0, 0),
            _ => (self.distro.as_str(), self.version_key(), self.instance),
        }
    }

    /// Display order: descending by `(distro, version_key, instance)`.
    pub fn display_cmp(&self, other: &Self) -> Ordering {
        other.sort_key().cmp(&self.sort_key())
    }
}

impl fmt::Display for VmIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.form {
            NameForm::Modern => write!(
                f,
                "{}-{}-{}-{}",
                self.prefix, self.distro, self.version, self.instance
            ),
            NameForm::Legacy => write!(f, "{}-{}-{}", self.prefix, self.version, self.instance),
            NameForm::Unparsed => write!(f, "{}-{}", self.prefix, self.version),
        }
    }
}

/// Comparable key for a version string.
///
/// All-digit versions compare as integers, `major.minor` as
/// `major * 100 + minor`. Anything else is `0`, so non-numeric versions sort
/// together regardless of their text.
pub fn version_key(version: &str) -> u64 {
    if let Some(n) = parse_digits(version) {
        return n;
    }

    if let Some((major, minor)) = version.split_once('.') {
        if let (Some(major), Some(minor)) = (parse_digits(major), parse_digits(minor)) {
            return major.saturating_mul(100).saturating_add(minor);
        }
    }

    0
}

fn parse_digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Parses and formats fleet VM names for one deployment.
#[derive(Debug, Clone)]
pub struct IdentityCodec {
    prefix: String,
    default_distro: String,
}

impl IdentityCodec {
    pub fn new(prefix: impl Into<String>, default_distro: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            default_distro: default_distro.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn default_distro(&self) -> &str {
        &self.default_distro
    }

    /// Decode a VM name. `None` means the name is not a fleet VM.
    ///
    /// Every `{prefix}-{rest}` name with a non-empty `rest` is a fleet VM.
    /// Names whose segments don't decode come back as [`NameForm::Unparsed`].
    pub fn parse(&self, name: &str) -> Option<VmIdentity> {
        let rest = name.strip_prefix(&self.prefix)?.strip_prefix('-')?;
        if rest.is_empty() {
            return None;
        }

        Some(self.parse_segments(rest).unwrap_or_else(|| VmIdentity {
            prefix: self.prefix.clone(),
            distro: String::new(),
            version: rest.to_string(),
            instance: 0,
            form: NameForm::Unparsed,
        }))
    }

    fn parse_segments(&self, rest: &str) -> Option<VmIdentity> {
        let segments: Vec<&str> = rest.split('-').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return None;
        }

        let (last, head) = segments.split_last()?;
        let instance = parse_instance(last)?;
        let (version, distro_parts) = head.split_last()?;

        let (distro, form) = if distro_parts.is_empty() {
            (self.default_distro.clone(), NameForm::Legacy)
        } else {
            (distro_parts.join("-"), NameForm::Modern)
        };

        Some(VmIdentity {
            prefix: self.prefix.clone(),
            distro,
            version: version.to_string(),
            instance,
            form,
        })
    }

    /// Encode an identity back into a VM name.
    pub fn format(&self, identity: &VmIdentity) -> String {
        identity.to_string()
    }

    /// Build the modern name for a new VM.
    pub fn name_for(&self, distro: &str, version: &str, instance: u32) -> String {
        format!("{}-{}-{}-{}", self.prefix, distro, version, instance)
    }
}

fn parse_instance(segment: &str) -> Option<u32> {
    if !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

/// Sort `(name, identity)` pairs into display order. Stable for ties.
pub fn sort_fleet<T>(items: &mut [T], identity_of: impl Fn(&T) -> &VmIdentity) {
    items.sort_by(|a, b| identity_of(a).display_cmp(identity_of(b)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> IdentityCodec {
        IdentityCodec::new("snail-test", "fedora")
    }

    #[test]
    fn test_parse_modern_name() {
        let id = codec().parse("snail-test-debian-12-3").unwrap();
        assert_eq!(id.distro, "debian");
        assert_eq!(id.version, "12");
        assert_eq!(id.instance, 3);
        assert_eq!(id.form, NameForm::Modern);
    }

    #[test]
    fn test_parse_dotted_version_keeps_formatting() {
        let id = codec().parse("snail-test-ubuntu-24.04-1").unwrap();
        assert_eq!(id.version, "24.04");
        assert_eq!(id.version_key(), 2404);
    }

    #[test]
    fn test_legacy_name_uses_default_distro() {
        let id = codec().parse("snail-test-42-7").unwrap();
        assert_eq!(id.instance, 7);
        assert_eq!(id.version, "42");
        assert_eq!(id.distro, "fedora");
        assert_eq!(id.form, NameForm::Legacy);
    }

    #[test]
    fn test_legacy_accepts_non_version_word() {
        // Accepted approximation: any `{word}-{integer}` is legacy.
        let id = codec().parse("snail-test-scratch-2").unwrap();
        assert_eq!(id.version, "scratch");
        assert_eq!(id.version_key(), 0);
    }

    #[test]
    fn test_non_fleet_names_are_not_matched() {
        let codec = codec();
        assert!(codec.parse("other-vm").is_none());
        assert!(codec.parse("snail-test").is_none());
        assert!(codec.parse("snail-test-").is_none());
        assert!(codec.parse("snail-testing-42-1").is_none());
    }

    #[test]
    fn test_undecodable_fleet_names_are_kept_verbatim() {
        let codec = codec();
        for name in [
            "snail-test-42",
            "snail-test-scratch",
            "snail-test-fedora-42-x",
            "snail-test-fedora--1",
            "snail-test-fedora-42-+1",
        ] {
            let id = codec.parse(name).unwrap();
            assert_eq!(id.form, NameForm::Unparsed, "{}", name);
            assert!(!id.is_parsed());
            assert_eq!(id.sort_key(), ("", 0, 0));
            assert_eq!(codec.format(&id), name);
        }

        let id = codec.parse("snail-test-fedora-42-x").unwrap();
        assert_eq!(id.version, "fedora-42-x");
        assert_eq!(id.instance, 0);
    }

    #[test]
    fn test_undecodable_names_sort_last() {
        let codec = codec();
        let mut ids: Vec<VmIdentity> = [
            "snail-test-scratch",
            "snail-test-debian-12-1",
            "snail-test-42",
            "snail-test-fedora-42-1",
        ]
        .iter()
        .map(|n| codec.parse(n).unwrap())
        .collect();

        sort_fleet(&mut ids, |id| id);

        let names: Vec<String> = ids.iter().map(|id| codec.format(id)).collect();
        assert_eq!(
            names,
            vec![
                "snail-test-fedora-42-1",
                "snail-test-debian-12-1",
                "snail-test-scratch",
                "snail-test-42",
            ]
        );
    }

    #[test]
    fn test_round_trip() {
        let codec = codec();
        let cases = [
            ("fedora", "42", 1, NameForm::Modern),
            ("ubuntu", "24.04", 12, NameForm::Modern),
            ("debian", "trixie", 0, NameForm::Modern),
            ("centos-stream", "9", 4, NameForm::Modern),
            ("fedora", "40", 3, NameForm::Legacy),
            ("", "scratch", 0, NameForm::Unparsed),
        ];

        for (distro, version, instance, form) in cases {
            let id = VmIdentity {
                prefix: "snail-test".to_string(),
                distro: distro.to_string(),
                version: version.to_string(),
                instance,
                form,
            };
            let name = codec.format(&id);
            assert_eq!(codec.parse(&name), Some(id), "round trip failed for {}", name);
        }
    }

    #[test]
    fn test_version_key() {
        assert_eq!(version_key("42"), 42);
        assert_eq!(version_key("24.04"), 2404);
        assert_eq!(version_key("22.10"), 2210);
        assert_eq!(version_key("bookworm"), 0);
        assert_eq!(version_key("1.2.3"), 0);
        assert_eq!(version_key(""), 0);
    }

    #[test]
    fn test_display_order() {
        let codec = codec();
        let mut ids: Vec<VmIdentity> = [
            "snail-test-debian-12-1",
            "snail-test-fedora-42-1",
            "snail-test-fedora-41-9",
            "snail-test-fedora-42-3",
            "snail-test-fedora-rawhide-5",
        ]
        .iter()
        .map(|n| codec.parse(n).unwrap())
        .collect();

        sort_fleet(&mut ids, |id| id);

        let names: Vec<String> = ids.iter().map(|id| codec.format(id)).collect();
        assert_eq!(
            names,
            vec![
                "snail-test-fedora-42-3",
                "snail-test-fedora-42-1",
                "snail-test-fedora-41-9",
                "snail-test-fedora-rawhide-5",
                "snail-test-debian-12-1",
            ]
        );
    }
}
