pub mod quality;
pub mod status;
