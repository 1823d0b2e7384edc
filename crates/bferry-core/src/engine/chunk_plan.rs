//! Byte-range planning for large-object downloads

use crate::error::TransferError;
use bferry_types::ByteRange;

/// Ranges to fetch and how many may run at once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    pub ranges: Vec<ByteRange>,
    pub concurrency_limit: usize,
}

impl ChunkPlan {
    pub fn is_chunked(&self) -> bool {
        self.ranges.len() > 1
    }
}

/// Reject chunking parameters no plan can be built from
pub fn validate_chunking(chunk_size: u64, concurrency_limit: usize) -> Result<(), TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::InvalidConfig(
            "chunk size must be at least 1 byte".to_string(),
        ));
    }
    if concurrency_limit == 0 {
        return Err(TransferError::InvalidConfig(
            "concurrency limit must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Split an object of `size` bytes into contiguous inclusive ranges.
///
/// Objects below `threshold` are fetched as one range with concurrency
/// forced to 1. A zero-byte object yields no ranges at all.
pub fn plan_chunks(
    size: u64,
    chunk_size: u64,
    concurrency_limit: usize,
    threshold: u64,
) -> Result<ChunkPlan, TransferError> {
    validate_chunking(chunk_size, concurrency_limit)?;

    if size == 0 {
        return Ok(ChunkPlan {
            ranges: Vec::new(),
            concurrency_limit: 1,
        });
    }

    if size < threshold {
        return Ok(ChunkPlan {
            ranges: vec![ByteRange::new(0, size - 1)],
            concurrency_limit: 1,
        });
    }

    let count = size.div_ceil(chunk_size);
    let ranges = (0..count)
        .map(|i| {
            let start = i * chunk_size;
            let end = start.saturating_add(chunk_size - 1).min(size - 1);
            ByteRange::new(start, end)
        })
        .collect();

    Ok(ChunkPlan {
        ranges,
        concurrency_limit,
    })
}
