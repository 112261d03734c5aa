/// Aliases and constants shared by the agent and its transports
pub mod data_types;

/// The abstraction over sending one echo request to a network address
pub mod echo;

/// Echo transport that runs the operating system's ping utility
pub mod system_ping;
