pub mod builtins;
pub mod dialect;
pub mod resolver;
#[allow(clippy::module_inception)]
mod types;

pub use dialect::{ConstantValue, Dialect, Game, ParamSignature, ScriptFunctionSignature};
pub use resolver::{Callee, GlobalVar, LocalSymbol, LocalVar, Resolver, Symbol, UserFunction};
pub use types::{DataType, StructMember, StructType};
