pub mod membership;
pub mod role;
pub mod tenant;
