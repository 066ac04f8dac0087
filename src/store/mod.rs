pub mod committed;
pub mod models;
pub mod temporary;
