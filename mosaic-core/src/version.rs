//! Plug-in versions and import match rules

use std::fmt;
use std::str::FromStr;

use crate::error::MosaicError;

/// A plug-in version: one to four dot-separated numeric components.
///
/// Missing components compare as zero, so `1.2` equals `1.2.0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    components: [u32; 4],
    /// How many components the source text carried (1-4); only affects
    /// display.
    declared: u8,
}

impl Version {
    /// Build a version from explicit components.
    pub fn new(components: &[u32]) -> Self {
        assert!(
            !components.is_empty() && components.len() <= 4,
            "a version has 1 to 4 components"
        );
        let mut padded = [0u32; 4];
        padded[..components.len()].copy_from_slice(components);
        Self {
            components: padded,
            declared: components.len() as u8,
        }
    }

    /// Compare the first `n` components of two versions.
    pub fn cmp_components(&self, other: &Version, n: usize) -> std::cmp::Ordering {
        let n = n.min(4);
        self.components[..n].cmp(&other.components[..n])
    }
}

impl FromStr for Version {
    type Err = MosaicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.is_empty() || parts.len() > 4 {
            return Err(MosaicError::malformed(format!(
                "version {s:?} must have 1 to 4 components"
            )));
        }
        let mut components = [0u32; 4];
        for (i, part) in parts.iter().enumerate() {
            components[i] = part.parse::<u32>().map_err(|_| {
                MosaicError::malformed(format!("version {s:?} has a non-numeric component"))
            })?;
        }
        Ok(Self {
            components,
            declared: parts.len() as u8,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.declared as usize {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", self.components[i])?;
        }
        Ok(())
    }
}

/// How an import's required version is matched against the provider's
/// version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionMatch {
    /// Any provider version, including none at all
    #[default]
    None,
    /// All four components equal
    Perfect,
    /// First two components equal and provider not older
    Equivalent,
    /// First component equal and provider not older
    Compatible,
    /// Provider not older
    GreaterOrEqual,
}

impl VersionMatch {
    /// Whether `provided` satisfies `required` under this rule.
    ///
    /// A provider without a version satisfies only [`VersionMatch::None`].
    pub fn satisfied_by(self, provided: Option<&Version>, required: &Version) -> bool {
        use std::cmp::Ordering;

        let provided = match (self, provided) {
            (Self::None, _) => return true,
            (_, Some(v)) => v,
            (_, None) => return false,
        };
        match self {
            Self::None => true,
            Self::Perfect => provided.cmp_components(required, 4) == Ordering::Equal,
            Self::Equivalent => {
                provided.cmp_components(required, 2) == Ordering::Equal
                    && provided.cmp_components(required, 4) != Ordering::Less
            }
            Self::Compatible => {
                provided.cmp_components(required, 1) == Ordering::Equal
                    && provided.cmp_components(required, 4) != Ordering::Less
            }
            Self::GreaterOrEqual => provided.cmp_components(required, 4) != Ordering::Less,
        }
    }
}

impl FromStr for VersionMatch {
    type Err = MosaicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "perfect" => Ok(Self::Perfect),
            "equivalent" => Ok(Self::Equivalent),
            "compatible" => Ok(Self::Compatible),
            "greater-or-equal" => Ok(Self::GreaterOrEqual),
            other => Err(MosaicError::malformed(format!(
                "unknown version match rule {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().expect("valid version")
    }

    #[test]
    fn parse_and_display_round_trip() {
        for s in ["1", "0.9", "1.2.3", "10.20.30.40"] {
            assert_eq!(v(s).to_string(), s);
        }
    }

    #[test]
    fn missing_components_are_zero() {
        assert_eq!(v("1.2"), v("1.2.0.0"));
        assert_eq!(
            v("1.2").cmp_components(&v("1.2.0"), 4),
            std::cmp::Ordering::Equal
        );
    }

    #[test]
    fn rejects_bad_versions() {
        assert!("".parse::<Version>().is_err());
        assert!("1.2.3.4.5".parse::<Version>().is_err());
        assert!("1.x".parse::<Version>().is_err());
        assert!("-1".parse::<Version>().is_err());
    }

    #[test]
    fn perfect_requires_all_components() {
        assert!(VersionMatch::Perfect.satisfied_by(Some(&v("1.2.3.4")), &v("1.2.3.4")));
        assert!(!VersionMatch::Perfect.satisfied_by(Some(&v("1.2.3.4")), &v("1.2.3")));
        assert!(VersionMatch::Perfect.satisfied_by(Some(&v("1.2")), &v("1.2.0")));
    }

    #[test]
    fn equivalent_pins_major_minor() {
        let rule = VersionMatch::Equivalent;
        assert!(rule.satisfied_by(Some(&v("1.3.9")), &v("1.3")));
        assert!(rule.satisfied_by(Some(&v("1.3.0.1")), &v("1.3")));
        // older than required
        assert!(!rule.satisfied_by(Some(&v("1.3")), &v("1.3.1")));
        // different minor
        assert!(!rule.satisfied_by(Some(&v("1.2.3.4")), &v("1.3")));
    }

    #[test]
    fn compatible_pins_major() {
        let rule = VersionMatch::Compatible;
        assert!(rule.satisfied_by(Some(&v("1.9")), &v("1.2")));
        assert!(!rule.satisfied_by(Some(&v("2.0")), &v("1.2")));
        assert!(!rule.satisfied_by(Some(&v("1.1")), &v("1.2")));
    }

    #[test]
    fn greater_or_equal_only_orders() {
        let rule = VersionMatch::GreaterOrEqual;
        assert!(rule.satisfied_by(Some(&v("2.0")), &v("1.9.9.9")));
        assert!(rule.satisfied_by(Some(&v("1.2")), &v("1.2")));
        assert!(!rule.satisfied_by(Some(&v("1.1.9")), &v("1.2")));
    }

    #[test]
    fn none_accepts_anything_including_no_version() {
        assert!(VersionMatch::None.satisfied_by(None, &v("9.9")));
        assert!(VersionMatch::None.satisfied_by(Some(&v("0.1")), &v("9.9")));
    }

    #[test]
    fn versionless_provider_fails_every_other_rule() {
        for rule in [
            VersionMatch::Perfect,
            VersionMatch::Equivalent,
            VersionMatch::Compatible,
            VersionMatch::GreaterOrEqual,
        ] {
            assert!(!rule.satisfied_by(None, &v("1.0")));
        }
    }

    #[test]
    fn match_rule_names_parse() {
        assert_eq!(
            "greater-or-equal".parse::<VersionMatch>().unwrap(),
            VersionMatch::GreaterOrEqual
        );
        assert!("sorta".parse::<VersionMatch>().is_err());
    }
}
