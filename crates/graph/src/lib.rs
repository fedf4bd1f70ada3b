//! flowgen-graph: the state-graph data model.
//!
//! Provides the typed representation of state units (screen lifecycles
//! described as states, transitions, and validation blocks), the lenient
//! deserializer from unit JSON, and the discovery index / state registry
//! snapshots the compiler resolves transitions against.
//!
//! Key types are re-exported at the crate root:
//!
//! - [`StateUnit`], [`StateGraph`], [`StateNode`] -- the graph itself
//! - [`ValidationScreen`], [`Block`], [`BlockData`] -- per-screen checks
//! - [`ExprNode`] -- minimal expression AST with first-class opaque nodes
//! - [`DiscoveryIndex`], [`StateRegistry`] -- cross-unit lookup snapshots
//! - [`parse_state_unit`] -- JSON to typed structs, strict or lenient

pub mod ast;
pub mod deserialize;
pub mod error;
pub mod index;
pub mod types;

pub use ast::{ExprNode, OpaqueKind};
pub use deserialize::{parse_state_unit, ParseMode};
pub use error::GraphError;
pub use index::{normalize_state_name, DiscoveryIndex, IndexTriple, StateRegistry};
pub use types::{
    ActionDetails, ActionStep, Block, BlockData, EntryAssign, FunctionAssertion, ImportRef,
    SetupEntry, StateGraph, StateMeta, StateNode, StateUnit, TextCheck, Transition,
    TransitionSpec, ValidationScreen,
};
