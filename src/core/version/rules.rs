// ─── Library Rules ───
// Platform filtering for version descriptor libraries.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LibraryRule {
    pub action: RuleAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<OsRule>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Disallow,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OsRule {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arch: Option<String>,
}

/// The platform libraries are filtered for. Names follow the descriptor
/// vocabulary (`windows`, `osx`, `linux`; `x86`, `x86_64`, `arm64`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn current() -> Self {
        Self {
            os: current_os_name().to_string(),
            arch: current_arch_name().to_string(),
        }
    }

    pub fn new(os: &str, arch: &str) -> Self {
        Self {
            os: os.to_string(),
            arch: arch.to_string(),
        }
    }

    /// Value substituted for `${arch}` in native classifiers.
    pub fn arch_bits(&self) -> &'static str {
        if self.arch == "x86" {
            "32"
        } else {
            "64"
        }
    }
}

impl OsRule {
    fn matches(&self, platform: &Platform) -> bool {
        let name_ok = self.name.as_deref().map_or(true, |n| n == platform.os);
        let arch_ok = self.arch.as_deref().map_or(true, |a| a == platform.arch);
        name_ok && arch_ok
    }
}

impl LibraryRule {
    /// A rule without an OS constraint applies everywhere.
    pub fn applies_to(&self, platform: &Platform) -> bool {
        self.os.as_ref().map_or(true, |os| os.matches(platform))
    }
}

/// Evaluate rules in manifest order. The last rule that applies decides;
/// if none applies (or there are none) the library is allowed.
pub fn rules_allow(rules: &[LibraryRule], platform: &Platform) -> bool {
    rules
        .iter()
        .filter(|rule| rule.applies_to(platform))
        .last()
        .map_or(true, |rule| rule.action == RuleAction::Allow)
}

pub fn current_os_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "macos") {
        "osx"
    } else {
        "linux"
    }
}

fn current_arch_name() -> &'static str {
    if cfg!(target_arch = "x86") {
        "x86"
    } else if cfg!(target_arch = "aarch64") {
        "arm64"
    } else {
        "x86_64"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(action: RuleAction, os: Option<&str>) -> LibraryRule {
        LibraryRule {
            action,
            os: os.map(|name| OsRule {
                name: Some(name.to_string()),
                arch: None,
            }),
        }
    }

    fn linux() -> Platform {
        Platform::new("linux", "x86_64")
    }

    #[test]
    fn no_rules_means_allowed() {
        assert!(rules_allow(&[], &linux()));
    }

    #[test]
    fn unmatched_rules_default_to_allow() {
        let rules = vec![rule(RuleAction::Disallow, Some("osx"))];
        assert!(rules_allow(&rules, &linux()));
    }

    #[test]
    fn disallow_after_allow_wins() {
        let rules = vec![
            rule(RuleAction::Allow, None),
            rule(RuleAction::Disallow, Some("linux")),
        ];
        assert!(!rules_allow(&rules, &linux()));
        assert!(rules_allow(&rules, &Platform::new("windows", "x86_64")));
    }

    #[test]
    fn later_allow_flips_earlier_disallow() {
        let rules = vec![
            rule(RuleAction::Disallow, None),
            rule(RuleAction::Allow, Some("linux")),
        ];
        assert!(rules_allow(&rules, &linux()));
        assert!(!rules_allow(&rules, &Platform::new("osx", "arm64")));
    }

    #[test]
    fn arch_constraint_must_match_too() {
        let rules = vec![LibraryRule {
            action: RuleAction::Disallow,
            os: Some(OsRule {
                name: Some("windows".into()),
                arch: Some("x86".into()),
            }),
        }];
        assert!(!rules_allow(&rules, &Platform::new("windows", "x86")));
        assert!(rules_allow(&rules, &Platform::new("windows", "x86_64")));
    }

    #[test]
    fn decision_is_last_matching_rule_for_every_sequence() {
        let platforms = [linux(), Platform::new("osx", "arm64")];
        let choices = [
            rule(RuleAction::Allow, None),
            rule(RuleAction::Disallow, None),
            rule(RuleAction::Allow, Some("linux")),
            rule(RuleAction::Disallow, Some("linux")),
            rule(RuleAction::Disallow, Some("osx")),
        ];

        for a in &choices {
            for b in &choices {
                for c in &choices {
                    let rules = vec![a.clone(), b.clone(), c.clone()];
                    for platform in &platforms {
                        let mut expected = true;
                        for r in &rules {
                            if r.applies_to(platform) {
                                expected = r.action == RuleAction::Allow;
                            }
                        }
                        assert_eq!(rules_allow(&rules, platform), expected, "{rules:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn deserializes_descriptor_rules() {
        let rules: Vec<LibraryRule> = serde_json::from_str(
            r#"[{"action":"allow"},{"action":"disallow","os":{"name":"osx"}}]"#,
        )
        .unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].os.as_ref().unwrap().name.as_deref(), Some("osx"));
    }
}
