//! Keyword auto-reply rules.
//!
//! Rules live in one flat JSON file:
//! 1. `model` — the serde wire shapes (`RuleSet`, `Rule`, ignore lists)
//! 2. `store` — cached loader with explicit reload, plus file-only edits
//! 3. `filter` — pure matching over one message and a `RuleSet` snapshot
//!
//! A file edit never touches the cache: the running pipeline sees it only
//! after the next `RuleStore::reload()`.

pub mod filter;
pub mod model;
pub mod store;
