#![allow(unused_doc_comments)]

#[macro_use(debug)]
extern crate tracing;

pub mod compose;
pub mod convert;
pub mod error;
pub mod guard;
pub mod model;
pub mod sampler;
pub mod symbol;
pub mod wiki;

pub use error::Error;
pub use error::Result;
