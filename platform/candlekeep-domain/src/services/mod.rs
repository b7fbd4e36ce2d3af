pub mod boundary;
pub mod indicators;
pub mod quality;
