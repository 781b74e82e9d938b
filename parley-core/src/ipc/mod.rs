//! Events published by the engine for status displays and level meters.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! forward them over whatever UI bridge it uses.

pub mod events;
