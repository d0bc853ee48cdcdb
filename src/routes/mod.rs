pub mod authz;
pub mod health;
pub mod memberships;
pub mod roles;
pub mod tenants;
