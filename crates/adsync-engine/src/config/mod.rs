//! Configuration parsing and validation.

pub mod parser;
pub mod types;
pub mod validator;

pub use parser::{
    parse_orchestrator, parse_orchestrator_str, parse_platform_tables, parse_platform_tables_str,
    substitute_env_vars,
};
pub use types::{
    LoadSpec, OrchestratorConfig, OrchestratorSettings, PlatformEntry, PlatformTables,
    ProcessingStepConfig, RetryPolicy, TableSettings,
};
pub use validator::{validate_orchestrator, validate_tables};
