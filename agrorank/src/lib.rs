//! Parcel ranking from drone orthomosaics.
//!
//! A job clips an orthomosaic to a parcel boundary, computes a vegetation
//! index, aggregates it over a grid of cells, then ranks and classifies the
//! cells. See [`pipeline::Pipeline`] for the end-to-end run and
//! [`geometric`] for the individual stages.

pub mod collect;
pub mod commons;
pub mod config;
pub mod error;
pub mod geo_core;
pub mod geometric;
pub mod io;
pub mod notify;
pub mod pipeline;
pub mod raster;
pub mod vector;

mod maybe_rayon;

pub use error::{Error, Result};
