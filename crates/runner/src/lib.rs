//! Headless generation runner.
//!
//! Reads one generation job from the environment, submits it through a
//! [`Studio`](comfystudio_client::session::Studio) session and follows the
//! node until it finishes.

pub mod job;
