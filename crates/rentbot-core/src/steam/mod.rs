//! Steam-side adapters: guard-code generation, remote session
//! deauthorization and presence lookups.

pub mod guard;
pub mod presence;
pub mod worker;
