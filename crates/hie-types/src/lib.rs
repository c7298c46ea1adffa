//! Shared domain types for the HIE messaging pipeline.
//!
//! These are the read-only inputs handed to the pipeline by the visit-recording workflow:
//! students, institutions, visits and the optional vital-sign assessment taken during a
//! visit. The pipeline never mutates them.

mod clinic;
mod text;

pub use clinic::{Assessment, Gender, Institution, PersonName, Student, Visit};
pub use text::{NonEmptyText, TextError};
