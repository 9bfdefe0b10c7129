//! In-memory session registry
//!
//! Binds opaque browser-held session identifiers to authenticated users for
//! the lifetime of the process. Sessions expire after a configurable idle TTL:
//! lazily when looked up, and in bulk by a periodic sweep task.
//!
//! Session lifecycle:
//! 1. Login/registration → `SessionRegistry::create` → id set as cookie
//! 2. Each protected request → `SessionRegistry::lookup` refreshes `last_seen`
//! 3. Logout → `SessionRegistry::invalidate`
//! 4. Idle longer than TTL → removed on next lookup or sweep

pub mod registry;
pub mod sweep;

pub use registry::{Session, SessionId, SessionRegistry};
pub use sweep::spawn_sweep_task;
