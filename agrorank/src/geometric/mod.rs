pub mod clip;
pub mod index;
pub mod quality;
pub mod ranking;
pub mod rasterize;
pub mod zonal;
