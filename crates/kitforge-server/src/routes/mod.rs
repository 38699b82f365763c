pub mod builds;
pub mod health;
pub mod tenants;
