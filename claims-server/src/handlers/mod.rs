pub mod claims;
pub mod denials;
pub mod health;
pub mod reports;
