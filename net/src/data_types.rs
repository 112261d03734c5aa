/*
Aliases for data types for readability and to allow resizing in future
*/

pub type RoundTripMillis = u64; // Round trip time of one echo, as reported by the transport
pub type Distance = u64; // Average round trip time in milliseconds, or UNREACHABLE_DISTANCE
pub type AttemptCount = u32; // Number of echo attempts that are averaged into one distance
pub type VersionNumber = u32; // Allows 4 billion updates to each node record

/// Distance recorded for a peer when the echo transport fails while measuring it
pub const UNREACHABLE_DISTANCE: Distance = 100000;
