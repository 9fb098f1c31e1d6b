//! Framewright Project Model
//!
//! Defines the read-only inputs of the preview engine:
//! - **Timeline:** Tracks of media and text elements with trims
//! - **Media:** Imported media items looked up by id
//! - **Project:** Canvas size, frame rate, background, and snapshot files
//!
//! The engine never mutates these types. Editing operations replace the
//! snapshot and the engine picks up the new one on its next frame.

pub mod color;
pub mod media;
pub mod project;
pub mod timeline;

pub use color::*;
pub use media::*;
pub use project::*;
pub use timeline::*;
