//! Format converters

pub mod builder;
pub mod cleaner;
pub mod epub;
pub mod markup;
pub mod text;
