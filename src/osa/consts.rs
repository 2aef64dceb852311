//! Constants for the bounce-buffer memory pool.

/// Size of 4 MiB.
pub const SZ_4M: usize = 4 * 1024 * 1024;
/// Max size manageable by the TLSF pool backing the DMA bounce buffer.
///
/// Sized to the single bounce-buffer allocation `Host::init` makes, plus
/// headroom for TLSF's own block metadata.
pub const MAX_POOL_SIZE: usize = SZ_4M + 64 * 1024;
