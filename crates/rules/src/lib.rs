//! Reactive maintenance rules.
//!
//! This crate provides:
//! - A registry of rule instances backed by a database collection or memory
//! - Five rule kinds keeping derived state equal to a full recompute:
//!   revision stamps, child counts, grouped min/max, tree levels and
//!   union/subtype mirrors
//! - [`RuleEngine`], the event adapter that runs the rules inside the
//!   mutating transaction
//! - YAML declaration files for provisioning instances

pub mod definition;
pub mod engine;
pub mod error;
pub mod handler;
pub mod kinds;
pub mod loader;
pub mod registry;
pub mod validation;

pub use definition::{RuleDeclaration, RuleDefinition, RuleInstance, RuleKind};
pub use engine::RuleEngine;
pub use error::{LoadResult, LoadStatus, Result, RuleError};
pub use handler::ReactiveRule;
pub use kinds::{CountLink, GroupAggregate, GroupSummary, RevisionStamp, SyncDirection, TreeLevel, UnionSync};
pub use loader::DeclarationLoader;
pub use registry::{CollectionRegistry, MemoryRegistry, Registry, RegistryStore};
