/// Router Module Index
///
/// Splits the page routes by the session they expect. Access control itself
/// is not applied here: the access gate in `crate::gate` wraps the whole
/// router and decides per path class.

/// Routes reachable by anyone (landing, health probe).
pub mod public;

/// Routes that read the gate-provided session (profile, logout).
pub mod authenticated;
