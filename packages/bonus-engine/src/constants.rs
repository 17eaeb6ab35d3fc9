/// Whole currency units carried by every bonus pool.
pub const TOTAL_AMOUNT: u64 = 400;

/// Flat bonus paid to the closer regardless of rank.
pub const DIRECT_AMOUNT: u64 = 200;

/// Hierarchical share, split into slices.
pub const STAR_POOL_AMOUNT: u64 = 200;

/// Slices per pool and the value of each.
pub const TOTAL_SLICES: u8 = 4;
pub const SLICE_VALUE: u64 = 50;

/// Highest star level an agent can hold.
pub const MAX_STAR_LEVEL: u8 = 4;

const _: () = assert!(STAR_POOL_AMOUNT == TOTAL_SLICES as u64 * SLICE_VALUE);
const _: () = assert!(TOTAL_AMOUNT == DIRECT_AMOUNT + STAR_POOL_AMOUNT);
const _: () = assert!(MAX_STAR_LEVEL == TOTAL_SLICES);
