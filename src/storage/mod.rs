//! Storage layer abstractions and implementations.
//!
//! Rules and execution logs are accessed through traits so the pipeline can
//! run against PostgreSQL in production and in-memory implementations in
//! tests. The append-only execution log is the authoritative source for
//! rate-limit counting; every count the execution gate treats as binding
//! comes from here.

use crate::errors::StorageError;

pub mod log;
pub mod memory;
pub mod rule;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

pub use log::{AutomationLog, ExecutionLogStorage, PostgresExecutionLogStorage};
pub use memory::{MemoryExecutionLogStorage, MemoryRuleStorage};
pub use rule::{
    Action, AutomationRule, FollowerRange, PostgresRuleStorage, RuleConditions, RuleScope,
    RuleStorage, TimeWindow, Trigger,
};
