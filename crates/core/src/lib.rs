//! Domain core for ComfyStudio.
//!
//! Pure, I/O-free logic: output dimension derivation, prompt template
//! resolution, workflow capabilities, the generation node lifecycle, the
//! per-project node store, and timeline projection. The HTTP client and
//! the reconciliation poller live in `comfystudio-client`.

pub mod catalog;
pub mod dimensions;
pub mod editor;
pub mod error;
pub mod node;
pub mod project;
pub mod store;
pub mod template;
pub mod timeline;
pub mod timestamp;
pub mod types;
pub mod workflow;
