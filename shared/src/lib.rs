/// Shared types for the Muse Media Engine.
///
/// Everything that crosses the boundary between the engine and the
/// application shell lives here: session states and snapshots, the
/// command/reply protocol, and the error taxonomy.
pub mod errors;
pub mod models;
pub mod protocol;
