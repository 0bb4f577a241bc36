pub(crate) const DEFAULT_LISTEN: &str = "127.0.0.1:8080";
pub(crate) const DEFAULT_DATA_DIR: &str = "./data";
pub(crate) const BLOCKS_PER_PAGE: u64 = 25;
pub(crate) const MAX_BLOCKS_PER_REQUEST: u64 = BLOCKS_PER_PAGE * 10;
