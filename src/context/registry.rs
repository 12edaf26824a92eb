//! Declarative command definitions.
//!
//! Each lifecycle command declares where it may run, what WU status it
//! expects, and which predicates must hold. The validator evaluates the
//! whole table; commands themselves contain no ad-hoc precondition checks.

use once_cell::sync::Lazy;

use crate::wu::WuStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationReq {
    Main,
    Worktree,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusReq {
    /// The WU must exist and be in this status.
    Is(WuStatus),
    /// The WU must exist; any status goes.
    Any,
    /// The WU must not exist yet.
    None,
    /// The command doesn't involve a WU (or takes it optionally).
    Optional,
}

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: &'static str,
    pub required_location: LocationReq,
    pub required_wu_status: StatusReq,
    /// Predicate ids evaluated in order; see the validator for definitions.
    pub predicates: &'static [&'static str],
    pub description: &'static str,
}

#[derive(Debug)]
pub struct CommandRegistry {
    commands: Vec<CommandSpec>,
}

static REGISTRY: Lazy<CommandRegistry> = Lazy::new(|| CommandRegistry {
    commands: vec![
        CommandSpec {
            name: "wu:create",
            required_location: LocationReq::Main,
            required_wu_status: StatusReq::None,
            predicates: &[],
            description: "create a new work unit",
        },
        CommandSpec {
            name: "wu:claim",
            required_location: LocationReq::Main,
            required_wu_status: StatusReq::Is(WuStatus::Ready),
            predicates: &["state-consistent", "lane-free", "worktree-absent"],
            description: "claim a ready work unit and provision its worktree",
        },
        CommandSpec {
            name: "wu:done",
            required_location: LocationReq::Main,
            required_wu_status: StatusReq::Is(WuStatus::InProgress),
            predicates: &[
                "state-consistent",
                "worktree-present",
                "worktree-clean",
                "has-commits",
                "branch-tracks-origin",
            ],
            description: "run gates and merge the work unit to the trunk",
        },
        CommandSpec {
            name: "wu:block",
            required_location: LocationReq::Any,
            required_wu_status: StatusReq::Is(WuStatus::InProgress),
            predicates: &["state-consistent"],
            description: "mark a work unit blocked",
        },
        CommandSpec {
            name: "wu:unblock",
            required_location: LocationReq::Any,
            required_wu_status: StatusReq::Is(WuStatus::Blocked),
            predicates: &["state-consistent"],
            description: "return a blocked work unit to progress",
        },
        CommandSpec {
            name: "wu:release",
            required_location: LocationReq::Main,
            required_wu_status: StatusReq::Any,
            predicates: &["state-consistent", "releasable-status"],
            description: "abandon a claim, returning the work unit to ready",
        },
        CommandSpec {
            name: "wu:checkpoint",
            required_location: LocationReq::Any,
            required_wu_status: StatusReq::Is(WuStatus::InProgress),
            predicates: &[],
            description: "record progress without changing status",
        },
        CommandSpec {
            name: "wu:spawn",
            required_location: LocationReq::Any,
            required_wu_status: StatusReq::Is(WuStatus::Ready),
            predicates: &["state-consistent", "lane-free"],
            description: "delegate a target work unit to another agent",
        },
        CommandSpec {
            name: "wu:recover",
            required_location: LocationReq::Main,
            required_wu_status: StatusReq::Any,
            predicates: &[],
            description: "resume, reset, or clean up a claimed work unit",
        },
        CommandSpec {
            name: "wu:status",
            required_location: LocationReq::Any,
            required_wu_status: StatusReq::Optional,
            predicates: &[],
            description: "show context and work unit state",
        },
        CommandSpec {
            name: "wu:validate",
            required_location: LocationReq::Any,
            required_wu_status: StatusReq::Optional,
            predicates: &[],
            description: "check YAML, event store, and worktrees for drift",
        },
    ],
});

impl CommandRegistry {
    pub fn global() -> &'static CommandRegistry {
        &REGISTRY
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.iter().find(|c| c.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.commands.iter().map(|c| c.name)
    }

    /// Closest known command name, for UNKNOWN_COMMAND remediation.
    pub fn closest(&self, name: &str) -> Option<&'static str> {
        self.commands
            .iter()
            .map(|c| (c.name, strsim::jaro_winkler(name, c.name)))
            .filter(|(_, score)| *score > 0.8)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(n, _)| n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_lifecycle() {
        let registry = CommandRegistry::global();
        for name in [
            "wu:create",
            "wu:claim",
            "wu:done",
            "wu:recover",
            "wu:status",
            "wu:validate",
        ] {
            assert!(registry.get(name).is_some(), "missing {name}");
        }
        assert!(registry.get("wu:frobnicate").is_none());
    }

    #[test]
    fn claim_requires_ready_on_main() {
        let spec = CommandRegistry::global().get("wu:claim").unwrap();
        assert_eq!(spec.required_location, LocationReq::Main);
        assert_eq!(spec.required_wu_status, StatusReq::Is(WuStatus::Ready));
        assert!(spec.predicates.contains(&"lane-free"));
    }

    #[test]
    fn closest_suggests_for_typos() {
        let registry = CommandRegistry::global();
        assert_eq!(registry.closest("wu:clam"), Some("wu:claim"));
        assert_eq!(registry.closest("wu:doen"), Some("wu:done"));
        assert_eq!(registry.closest("zzzzz"), None);
    }
}
