pub mod calibrate;
pub mod capture;
pub mod features;
pub mod spectrum;
