//! Library domain types

mod book;

pub use book::*;
