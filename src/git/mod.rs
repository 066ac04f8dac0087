pub mod object_store;
pub mod repository;
#[cfg(feature = "test-support")]
pub mod test_utils;
pub mod tree_builder;
