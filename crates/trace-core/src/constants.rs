pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const GENESIS_BLOCK_NUMBER: u64 = 1;
pub const APPEND_MAX_ATTEMPTS: u32 = 8;
pub const APPEND_BASE_DELAY_MS: u64 = 5;
pub const APPEND_MAX_DELAY_MS: u64 = 250;
pub const QR_PREFIX: &str = "QR_";
pub const BATCH_PREFIX: &str = "BATCH_";
