//! Consumer-facing types handed to the dashboard and report generator.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so they can be
//! pushed over whatever transport the host application uses.

pub mod events;
