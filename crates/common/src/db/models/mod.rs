//! Row models for the relational store

mod document;
mod keyword;

pub use document::DocumentRow;
pub use keyword::KeywordRow;
