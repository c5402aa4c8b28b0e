//! Database query modules.

pub mod harvests;
