//! Resource limits enforced by the verifier.

/// Maximum number of local register slots per function.
pub const MAX_LOCALS: u32 = 1 << 16;

/// Maximum argument count of a container constructor (`Array`, `Tuple`,
/// `Set`, `Map`).
pub const MAX_CONTAINER_ARGS: u32 = 1 << 20;

/// Maximum number of members in a module.
pub const MAX_MODULE_SIZE: usize = 1 << 20;
