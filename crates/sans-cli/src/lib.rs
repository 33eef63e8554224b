//! Command-line front end for the reduction engine.

pub mod cli;
