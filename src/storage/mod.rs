pub mod fileio;
pub mod heap;
pub mod tuple;
