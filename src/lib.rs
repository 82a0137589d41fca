//! Reverse-mode automatic differentiation over scalar values.
//!
//! Arithmetic on [`Value`]s builds a graph as it goes, computing each
//! forward value eagerly. [`Value::differentiate`] then fills in the gradient
//! of that output with respect to every node it depends on.
//!
//! ```
//! use toygrad::Value;
//!
//! let a = Value::new(2.);
//! let b = Value::new(-3.);
//! let c = Value::new(10.);
//! let l = (&a * &b + &c).powi(2);
//! l.differentiate();
//! assert_eq!(l.data(), 16.);
//! assert_eq!(a.grad(), -24.);
//! assert_eq!(b.grad(), 16.);
//! assert_eq!(c.grad(), 8.);
//! ```

pub mod error;
mod value;

pub use error::{Error, Result};
pub use value::Value;

#[cfg(feature = "macro")]
pub use toygrad_macro::toygrad;
