//! Rule kinds, per-kind configuration and registry entries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::handler::ReactiveRule;
use crate::kinds::{CountLink, GroupAggregate, RevisionStamp, TreeLevel, UnionSync};

/// The five supported rule types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    RevisionStamp,
    CountLink,
    GroupAggregate,
    TreeLevel,
    UnionSync,
}

impl RuleKind {
    pub const ALL: [RuleKind; 5] = [
        RuleKind::RevisionStamp,
        RuleKind::CountLink,
        RuleKind::GroupAggregate,
        RuleKind::TreeLevel,
        RuleKind::UnionSync,
    ];

    /// Only revision stamps can be switched off; everything else is always
    /// active once created.
    pub fn supports_toggle(&self) -> bool {
        matches!(self, RuleKind::RevisionStamp)
    }

    pub fn supports_refresh(&self) -> bool {
        matches!(self, RuleKind::CountLink | RuleKind::GroupAggregate)
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::RevisionStamp => write!(f, "revision_stamp"),
            RuleKind::CountLink => write!(f, "count_link"),
            RuleKind::GroupAggregate => write!(f, "group_aggregate"),
            RuleKind::TreeLevel => write!(f, "tree_level"),
            RuleKind::UnionSync => write!(f, "union_sync"),
        }
    }
}

impl FromStr for RuleKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "revision_stamp" | "revisionstamp" => Ok(RuleKind::RevisionStamp),
            "count_link" | "countlink" => Ok(RuleKind::CountLink),
            "group_aggregate" | "groupaggregate" => Ok(RuleKind::GroupAggregate),
            "tree_level" | "treelevel" => Ok(RuleKind::TreeLevel),
            "union_sync" | "unionsync" => Ok(RuleKind::UnionSync),
            _ => Err(format!("unknown rule kind: '{}'", s)),
        }
    }
}

/// Kind-specific configuration of a rule instance.
///
/// Serialized internally tagged on `kind`, which is also the layout of the
/// registry's `configuration` column and of declaration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleDefinition {
    RevisionStamp(RevisionStamp),
    CountLink(CountLink),
    GroupAggregate(GroupAggregate),
    TreeLevel(TreeLevel),
    UnionSync(UnionSync),
}

impl RuleDefinition {
    pub fn kind(&self) -> RuleKind {
        self.rule().kind()
    }

    /// Event handler for this configuration.
    pub fn rule(&self) -> &dyn ReactiveRule {
        match self {
            RuleDefinition::RevisionStamp(r) => r,
            RuleDefinition::CountLink(r) => r,
            RuleDefinition::GroupAggregate(r) => r,
            RuleDefinition::TreeLevel(r) => r,
            RuleDefinition::UnionSync(r) => r,
        }
    }

    /// The collection whose mutations drive the rule.
    pub fn target_collection(&self) -> &str {
        match self {
            RuleDefinition::RevisionStamp(r) => &r.collection,
            RuleDefinition::CountLink(r) => &r.child_collection,
            RuleDefinition::GroupAggregate(r) => &r.source_collection,
            RuleDefinition::TreeLevel(r) => &r.collection,
            RuleDefinition::UnionSync(r) => &r.base_collection,
        }
    }

    /// Every collection whose events are delivered to the rule.
    pub fn watched_collections(&self) -> Vec<&str> {
        self.rule().watches()
    }

    pub fn watches(&self, collection: &str) -> bool {
        self.watched_collections().contains(&collection)
    }
}

/// One registry entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleInstance {
    pub id: String,
    pub kind: RuleKind,
    pub target_collection: String,
    pub definition: RuleDefinition,
    pub enabled: bool,
}

impl RuleInstance {
    /// New instances start enabled.
    pub fn new(id: impl Into<String>, definition: impl Into<RuleDefinition>) -> Self {
        let definition = definition.into();
        Self {
            id: id.into(),
            kind: definition.kind(),
            target_collection: definition.target_collection().to_string(),
            definition,
            enabled: true,
        }
    }
}

/// A rule as written in a declaration file: `id`, `kind` and the kind's
/// configuration keys side by side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDeclaration {
    pub id: String,
    #[serde(flatten)]
    pub definition: RuleDefinition,
}

impl RuleDeclaration {
    pub fn new(id: impl Into<String>, definition: impl Into<RuleDefinition>) -> Self {
        Self {
            id: id.into(),
            definition: definition.into(),
        }
    }

    pub fn kind(&self) -> RuleKind {
        self.definition.kind()
    }
}

impl From<RevisionStamp> for RuleDefinition {
    fn from(r: RevisionStamp) -> Self {
        RuleDefinition::RevisionStamp(r)
    }
}

impl From<CountLink> for RuleDefinition {
    fn from(r: CountLink) -> Self {
        RuleDefinition::CountLink(r)
    }
}

impl From<GroupAggregate> for RuleDefinition {
    fn from(r: GroupAggregate) -> Self {
        RuleDefinition::GroupAggregate(r)
    }
}

impl From<TreeLevel> for RuleDefinition {
    fn from(r: TreeLevel) -> Self {
        RuleDefinition::TreeLevel(r)
    }
}

impl From<UnionSync> for RuleDefinition {
    fn from(r: UnionSync) -> Self {
        RuleDefinition::UnionSync(r)
    }
}
