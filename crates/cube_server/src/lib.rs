//! Cube's external surface: the textual command parser and the raw-TCP HTTP
//! front end that dispatches commands to the transaction manager.

pub mod command;
pub mod http;
