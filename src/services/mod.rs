pub mod cache;
pub mod normalize;
pub mod query_filter;
pub mod upstream;
