//! Line protocols served by a broker.
//!
//! Every connection starts with a server banner line and then exchanges one
//! request line for at most one reply line, tokens separated by spaces.

pub mod election;
pub mod messaging;

/// Reply to an unrecognised command.
pub const USAGE_ERROR: &str = "error usage: <command> <args>";
