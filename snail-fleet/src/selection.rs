//! Fleet selection.
//!
//! A target expression names which VMs an operation applies to. It is
//! resolved against a fresh discovery listing every time an operation runs,
//! because earlier commands may have changed fleet membership.

use std::fmt;

use crate::discovery::{FleetDiscovery, FleetMember};
use crate::error::{FleetError, Result};

/// What the user asked to operate on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetExpr {
    /// Every fleet VM
    All,
    /// One VM by exact name
    Named(String),
    /// Glob over VM names, e.g. `snail-test-fedora-*`
    Pattern(String),
}

impl TargetExpr {
    /// Interpret an optional `--vm`/`--limit` argument.
    ///
    /// Glob metacharacters make the value a pattern; anything else is an
    /// exact name.
    pub fn from_arg(arg: Option<&str>) -> Self {
        match arg.map(str::trim) {
            None | Some("") | Some("all") => TargetExpr::All,
            Some(value) if value.contains(|c: char| matches!(c, '*' | '?' | '[')) => TargetExpr::Pattern(value.to_string()),
            Some(value) => TargetExpr::Named(value.to_string()),
        }
    }
}

impl fmt::Display for TargetExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetExpr::All => f.write_str("all"),
            TargetExpr::Named(name) => f.write_str(name),
            TargetExpr::Pattern(pattern) => f.write_str(pattern),
        }
    }
}

/// The VMs a target expression resolved to, in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetSelection {
    target: TargetExpr,
    members: Vec<FleetMember>,
}

impl FleetSelection {
    /// Resolve `target` against an already-fetched member listing.
    ///
    /// An unknown name or a pattern that matches nothing is a targeting
    /// error. `All` over an empty fleet is an empty selection.
    pub fn resolve(target: &TargetExpr, members: Vec<FleetMember>) -> Result<Self> {
        let selected = match target {
            TargetExpr::All => members,
            TargetExpr::Named(name) => {
                let member = members
                    .into_iter()
                    .find(|m| &m.name == name)
                    .ok_or_else(|| FleetError::VmNotFound(name.clone()))?;
                vec![member]
            }
            TargetExpr::Pattern(pattern) => {
                let glob = glob::Pattern::new(pattern).map_err(|e| FleetError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
                let matched: Vec<FleetMember> = members
                    .into_iter()
                    .filter(|m| glob.matches(&m.name))
                    .collect();
                if matched.is_empty() {
                    return Err(FleetError::NoMatch(pattern.clone()));
                }
                matched
            }
        };

        Ok(Self {
            target: target.clone(),
            members: selected,
        })
    }

    /// Resolve `target` against the live fleet.
    pub async fn resolve_live(target: &TargetExpr, discovery: &FleetDiscovery) -> Result<Self> {
        let members = discovery.list_members().await;
        Self::resolve(target, members)
    }

    pub fn target(&self) -> &TargetExpr {
        &self.target
    }

    pub fn members(&self) -> &[FleetMember] {
        &self.members
    }

    pub fn into_members(self) -> Vec<FleetMember> {
        self.members
    }

    pub fn names(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Ansible `--limit` value for this selection. `None` means every host.
    pub fn host_limit(&self) -> Option<String> {
        match self.target {
            TargetExpr::All => None,
            _ => Some(self.names().join(",")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityCodec;

    fn members(names: &[&str]) -> Vec<FleetMember> {
        let codec = IdentityCodec::new("snail-test", "fedora");
        names
            .iter()
            .map(|n| FleetMember {
                name: n.to_string(),
                identity: codec.parse(n).unwrap(),
            })
            .collect()
    }

    #[test]
    fn test_target_from_arg() {
        assert_eq!(TargetExpr::from_arg(None), TargetExpr::All);
        assert_eq!(TargetExpr::from_arg(Some("")), TargetExpr::All);
        assert_eq!(
            TargetExpr::from_arg(Some("snail-test-fedora-42-1")),
            TargetExpr::Named("snail-test-fedora-42-1".to_string())
        );
        assert_eq!(
            TargetExpr::from_arg(Some("snail-test-debian-*")),
            TargetExpr::Pattern("snail-test-debian-*".to_string())
        );
    }

    #[test]
    fn test_all_selects_everything() {
        let selection = FleetSelection::resolve(
            &TargetExpr::All,
            members(&["snail-test-fedora-42-2", "snail-test-fedora-42-1"]),
        )
        .unwrap();

        assert_eq!(selection.len(), 2);
        assert_eq!(selection.host_limit(), None);
    }

    #[test]
    fn test_named_selection() {
        let selection = FleetSelection::resolve(
            &TargetExpr::Named("snail-test-fedora-42-1".to_string()),
            members(&["snail-test-fedora-42-2", "snail-test-fedora-42-1"]),
        )
        .unwrap();

        assert_eq!(selection.names(), vec!["snail-test-fedora-42-1"]);
        assert_eq!(selection.host_limit().as_deref(), Some("snail-test-fedora-42-1"));
    }

    #[test]
    fn test_unknown_name_is_targeting_error() {
        let result = FleetSelection::resolve(
            &TargetExpr::Named("snail-test-fedora-42-9".to_string()),
            members(&["snail-test-fedora-42-1"]),
        );
        assert!(matches!(result, Err(FleetError::VmNotFound(name)) if name == "snail-test-fedora-42-9"));
    }

    #[test]
    fn test_pattern_selection() {
        let selection = FleetSelection::resolve(
            &TargetExpr::Pattern("snail-test-debian-*".to_string()),
            members(&[
                "snail-test-fedora-42-1",
                "snail-test-debian-12-2",
                "snail-test-debian-12-1",
            ]),
        )
        .unwrap();

        assert_eq!(selection.names(), vec!["snail-test-debian-12-2", "snail-test-debian-12-1"]);
        assert_eq!(
            selection.host_limit().as_deref(),
            Some("snail-test-debian-12-2,snail-test-debian-12-1")
        );
    }

    #[test]
    fn test_pattern_without_matches_is_error() {
        let result = FleetSelection::resolve(
            &TargetExpr::Pattern("snail-test-ubuntu-*".to_string()),
            members(&["snail-test-fedora-42-1"]),
        );
        assert!(matches!(result, Err(FleetError::NoMatch(_))));
    }
}
