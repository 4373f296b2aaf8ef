pub mod features;
pub mod forecast;
