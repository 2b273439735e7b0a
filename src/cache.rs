pub(crate) mod bitmap_pool;
pub(crate) mod decode;
pub(crate) mod filter_results;
