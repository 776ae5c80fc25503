//! Filter compilation.
//!
//! A [`FilterModule`] maps names to predicate factories. Compiling a
//! publication calls the named factory with the publication's params and
//! yields a [`Predicate`] that is evaluated against records:
//!
//! ```ignore
//! let module = filters::common();
//! let predicate = module.compile("query", &[json!({"dept": "acct"})])?;
//! assert!(predicate.matches(&json!({"dept": "acct"})));
//! ```

mod common;
mod compiler;

pub use common::common;
pub use compiler::{compile, FilterFactory, FilterModule, FilterModuleBuilder, Predicate};
