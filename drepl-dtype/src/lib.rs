#![deny(missing_docs)]

//! A type system for datasets replicated across views
//!
//! Every variable of a dataset has a [`DType`]: a fixed-width primitive, a fixed-extent array of
//! some element type, or a struct of named fields. Types are fully sized, there are no variable
//! length values, so the byte layout of a variable is a pure function of its type.

pub use dtype::*;
pub use ptype::*;
pub use struct_::*;

mod dtype;
mod ptype;
mod struct_;
