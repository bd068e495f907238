pub mod analysis;
pub mod samples;
