//! Compilation of state-unit JSON into runnable screen-flow tests.
//!
//! The pipeline, in dependency order: project resolution ([`project`]),
//! unit loading ([`loader`]), incoming-transition resolution
//! ([`transitions`]), metadata extraction ([`metadata`]), block lowering
//! ([`blocks`]), variable scoping ([`scope`]), import path resolution
//! ([`paths`]), and code emission ([`template`] + [`emit`]).
//! [`compile::Compiler`] wires them together.

pub mod blocks;
pub mod compile;
pub mod emit;
pub mod error;
pub mod loader;
pub mod metadata;
pub mod paths;
pub mod platform;
pub mod project;
pub mod scope;
pub mod strings;
pub mod template;
pub mod transitions;

pub use compile::{CompileOutput, CompileRequest, Compiler};
pub use error::CompileError;
pub use platform::Platform;
pub use project::{Project, ProjectConfig};
pub use transitions::ExplicitTransition;
