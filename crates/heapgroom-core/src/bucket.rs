//! Bucket classification.
//!
//! Maps a requested size to the size the modeled allocator actually grants.
//! By default a bucket is the request rounded up to the configured alignment;
//! an explicit bucket table can model allocators with coarser size classes.
//! Every bucket-keyed lookup in the crate goes through [`classify`] or a
//! [`BucketClassifier`], so rounding never diverges between components.

use crate::error::{GroomError, Result};

/// Granted allocation size for a request.
pub type BucketSize = usize;

/// Default slot alignment (bytes).
pub const DEFAULT_ALIGNMENT: usize = 16;

/// Size-class table shaped like a slab allocator's small bins.
///
/// 16-byte steps up to 128, 32-byte steps up to 384, then wider classes.
pub const SLAB_BUCKET_TABLE: [usize; 24] = [
    16, 32, 48, 64, 80, 96, 112, 128, // 16-byte steps
    160, 192, 224, 256, 288, 320, 352, 384, // 32-byte steps
    448, 512, 640, 768, 896, 1024, 1536, 2048, // wider steps
];

/// Rounds `size` up to the next multiple of `alignment`.
///
/// Both arguments must be positive.
pub fn classify(size: usize, alignment: usize) -> Result<BucketSize> {
    if size == 0 {
        return Err(GroomError::invalid_input("size", size));
    }
    if alignment == 0 {
        return Err(GroomError::invalid_input("alignment", alignment));
    }
    size.div_ceil(alignment)
        .checked_mul(alignment)
        .ok_or_else(|| GroomError::invalid_input("size", size))
}

/// Largest power-of-two alignment in {8, 16, 32, 64} dividing `size`.
///
/// Sizes that are not a multiple of 8 report 8, the allocator's floor.
pub fn natural_alignment(size: usize) -> usize {
    [64, 32, 16, 8]
        .into_iter()
        .find(|&a| size != 0 && size % a == 0)
        .unwrap_or(8)
}

/// Classifier carrying the tunable fidelity parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketClassifier {
    alignment: usize,
    table: Option<Vec<BucketSize>>,
}

impl BucketClassifier {
    /// Alignment-only classifier.
    pub fn new(alignment: usize) -> Result<Self> {
        if alignment == 0 {
            return Err(GroomError::invalid_input("alignment", alignment));
        }
        Ok(Self {
            alignment,
            table: None,
        })
    }

    /// Classifier with an explicit size-class table.
    ///
    /// Table entries must be strictly increasing multiples of `alignment`.
    /// Requests larger than the last entry fall back to alignment rounding.
    pub fn with_table(alignment: usize, table: Vec<BucketSize>) -> Result<Self> {
        let mut classifier = Self::new(alignment)?;
        for (i, &entry) in table.iter().enumerate() {
            if entry == 0 || entry % alignment != 0 {
                return Err(GroomError::invalid_input("bucket_table entry", entry));
            }
            if i > 0 && entry <= table[i - 1] {
                return Err(GroomError::invalid_input(
                    "bucket_table order",
                    format!("{} after {}", entry, table[i - 1]),
                ));
            }
        }
        classifier.table = Some(table);
        Ok(classifier)
    }

    /// Classifier using [`SLAB_BUCKET_TABLE`].
    pub fn slab_preset() -> Self {
        Self {
            alignment: DEFAULT_ALIGNMENT,
            table: Some(SLAB_BUCKET_TABLE.to_vec()),
        }
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Bucket granted for a request of `size` bytes.
    pub fn bucket_of(&self, size: usize) -> Result<BucketSize> {
        if size == 0 {
            return Err(GroomError::invalid_input("size", size));
        }
        if let Some(table) = &self.table {
            // Linear scan; tables are a few dozen entries at most.
            if let Some(&class) = table.iter().find(|&&class| size <= class) {
                return Ok(class);
            }
        }
        classify(size, self.alignment)
    }
}

impl Default for BucketClassifier {
    fn default() -> Self {
        Self {
            alignment: DEFAULT_ALIGNMENT,
            table: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_rounds_up() {
        assert_eq!(classify(1, 16).unwrap(), 16);
        assert_eq!(classify(16, 16).unwrap(), 16);
        assert_eq!(classify(17, 16).unwrap(), 32);
        assert_eq!(classify(48, 16).unwrap(), 48);
        assert_eq!(classify(65, 8).unwrap(), 72);
    }

    #[test]
    fn classify_rejects_zero() {
        assert!(matches!(
            classify(0, 16),
            Err(GroomError::InvalidInput { what: "size", .. })
        ));
        assert!(matches!(
            classify(16, 0),
            Err(GroomError::InvalidInput {
                what: "alignment",
                ..
            })
        ));
    }

    #[test]
    fn classify_rejects_overflow() {
        assert!(classify(usize::MAX, 16).is_err());
    }

    #[test]
    fn natural_alignment_prefers_largest() {
        assert_eq!(natural_alignment(128), 64);
        assert_eq!(natural_alignment(96), 32);
        assert_eq!(natural_alignment(48), 16);
        assert_eq!(natural_alignment(24), 8);
        assert_eq!(natural_alignment(13), 8);
    }

    #[test]
    fn table_classifier_uses_classes_then_falls_back() {
        let classifier = BucketClassifier::slab_preset();
        assert_eq!(classifier.bucket_of(1).unwrap(), 16);
        assert_eq!(classifier.bucket_of(129).unwrap(), 160);
        assert_eq!(classifier.bucket_of(1025).unwrap(), 1536);
        assert_eq!(classifier.bucket_of(2049).unwrap(), 2064);
    }

    #[test]
    fn table_must_be_aligned_and_increasing() {
        assert!(BucketClassifier::with_table(16, vec![16, 40]).is_err());
        assert!(BucketClassifier::with_table(16, vec![32, 32]).is_err());
        assert!(BucketClassifier::with_table(16, vec![32, 16]).is_err());
        assert!(BucketClassifier::with_table(16, vec![16, 32, 64]).is_ok());
    }

    #[test]
    fn slab_table_monotonic_and_aligned() {
        for i in 1..SLAB_BUCKET_TABLE.len() {
            assert!(
                SLAB_BUCKET_TABLE[i] > SLAB_BUCKET_TABLE[i - 1],
                "class {} ({}) must be > class {} ({})",
                i,
                SLAB_BUCKET_TABLE[i],
                i - 1,
                SLAB_BUCKET_TABLE[i - 1]
            );
            assert_eq!(SLAB_BUCKET_TABLE[i] % DEFAULT_ALIGNMENT, 0);
        }
    }

    #[test]
    fn default_classifier_matches_free_function() {
        let classifier = BucketClassifier::default();
        for size in 1..=512 {
            assert_eq!(
                classifier.bucket_of(size).unwrap(),
                classify(size, DEFAULT_ALIGNMENT).unwrap()
            );
        }
    }
}
