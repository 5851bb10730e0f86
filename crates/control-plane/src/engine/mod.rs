//! Analysis engine.
//!
//! - **Compiler**: turns a workflow graph into an ordered stage plan
//! - **Evaluator**: decides conditional branches with a degradation ladder
//! - **Executor**: runs stages one at a time against an analysis service
//! - **Router**: hands every sink the reports of the branch that fed it

pub mod compiler;
pub mod condition;
pub mod evaluator;
pub mod executor;
pub mod field_path;
pub mod router;
pub mod rules;
pub mod state;

pub use compiler::{CompiledPlan, GraphCompiler, Stage};
pub use condition::{Condition, ConditionKind};
pub use evaluator::{ConditionEvaluator, EvaluationOutcome, EvaluationStrategy, LadderEvaluator};
pub use executor::{ExecutionReport, ExecutorConfig, StageExecutor};
pub use router::{ResultRouter, RoutingMismatch, RoutingStrategy, SinkState, SinkView};
pub use rules::VerdictRuleTable;
pub use state::{
    ResultsByStage, SkipReason, StageRecord, StageResult, StageRoutingRecord, StageState,
};
