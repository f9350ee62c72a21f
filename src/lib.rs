//! InpaintFE: select a rectangle of an image and have an inpainting model
//! repaint it.
//!
//! The selection state machine lives in [`controller`], the fill stages in
//! [`ops`] and [`pipeline`]. [`app`] is the egui front-end and [`cli`] the
//! headless batch mode; both drive the same controller.

#[macro_use]
pub mod logger;

pub mod app;
pub mod cli;
pub mod controller;
pub mod error;
pub mod io;
pub mod ops;
pub mod pipeline;
pub mod project;
pub mod settings;

pub use controller::{DisplaySurface, PointerEvent, SelectionController, SelectionState};
pub use error::FillError;
pub use ops::geometry::Rect;
pub use ops::inference::{InpaintModel, Inferencer};
pub use ops::scale::ModelSize;
