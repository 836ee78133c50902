//! Evaluate small scripts against an object while allowing only the methods it
//! explicitly exposes.
//!
//! A type opts in by implementing [`Cleanroom`] and declaring its [`ExposureSet`].
//! Scripts call exposed methods without a receiver (`method_1 'hello'`), and
//! everything else that would reach the object is denied with a [`Denial`].

pub mod error;
pub mod exposure;
mod interpreter;
pub mod parser;
pub mod sandbox;
mod script;
pub mod signature;
pub mod value;

pub use error::{Diagnostic, EvalError, SyntaxError};
pub use exposure::ExposureSet;
pub use sandbox::{
    Cleanroom, Denial, DenialKind, FileSystemLoader, INSTANCE_IDENTIFIER, Sandbox, SourceLoader,
};
pub use script::parse;
pub use signature::{ArgumentError, Arguments, CallArguments, Signature};
pub use value::{HashKey, Value};
