//! Need catalog: module content, per-step required/forbidden items, branch
//! rules and the label synonym table.
//!
//! * [`NeedCatalog`]: loaded once from `catalog.json`, shared read-only.
//! * [`CoachModule`] / [`Step`] / [`StepNeeds`] / [`BranchRule`]: content.
//! * [`ModuleSource`]: async lookup used when branching into remedial content.
//! * [`ItemMatcher`]: case-insensitive substring/synonym label matching.

pub mod matcher;
pub mod needs;

pub use matcher::ItemMatcher;
pub use needs::{BranchRule, CatalogError, CoachModule, ModuleSource, NeedCatalog, Step, StepNeeds};
