//! Command handlers for the `stimplan` binary

pub mod blocks;
pub mod design;
pub mod generate;
pub mod plan;
pub mod sanity;
pub mod segments;
