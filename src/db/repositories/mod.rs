pub mod intervals;
pub mod settings;
