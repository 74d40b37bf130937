// Route handler modules

pub mod analyze;
pub mod capture;
pub mod health;
