//! Expression identity types.
//!
//! Every expression in the repository is identified by an [`ExpressionId`].
//! Precoordinated concept codes and store-generated ids share the type and
//! are told apart by value: generated ids are allocated from
//! [`GENERATED_BASE`] upward, above every 18-digit concept identifier.
//! The [`IdAllocator`] hands out generated ids.
//!
//! Expression text is not checked against the split. A bare numeric
//! expression resolves to that number whatever its kind, so a generated id
//! printed by the repository can be written back as text (for example as a
//! query operand) and denotes the stored expression it was allocated for.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// First generated id. Concept identifiers have at most 18 decimal digits,
/// so they are always below `2^60`.
pub const GENERATED_BASE: u64 = 1 << 60;

/// Unique, niche-optimized identifier for an expression.
///
/// Uses `NonZeroU64` so that `Option<ExpressionId>` is the same size as
/// `ExpressionId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ExpressionId(NonZeroU64);

/// Which side of the id space an [`ExpressionId`] lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IdKind {
    /// A pre-existing single concept code.
    Precoordinated,
    /// Assigned by the store for a novel compositional expression.
    Generated,
}

impl ExpressionId {
    /// Create an `ExpressionId` from a raw `u64`.
    ///
    /// Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(ExpressionId)
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// Which kind of id this is, decided by value alone.
    pub fn kind(self) -> IdKind {
        if self.get() >= GENERATED_BASE {
            IdKind::Generated
        } else {
            IdKind::Precoordinated
        }
    }

    pub fn is_precoordinated(self) -> bool {
        self.kind() == IdKind::Precoordinated
    }

    /// Ordering used to pick an equivalence representative: precoordinated
    /// ids first, then the smallest value.
    pub fn representative_key(self) -> (IdKind, u64) {
        (self.kind(), self.get())
    }
}

impl std::fmt::Display for ExpressionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for IdKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdKind::Precoordinated => write!(f, "precoordinated"),
            IdKind::Generated => write!(f, "generated"),
        }
    }
}

/// Thread-safe allocator for generated expression ids.
///
/// Produces monotonically increasing ids starting from [`GENERATED_BASE`].
/// Ids are never handed out twice, even when the resolution that consumed
/// one is rolled back.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Create an allocator that starts from [`GENERATED_BASE`].
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(GENERATED_BASE),
        }
    }

    /// Create an allocator that resumes from a given raw value.
    ///
    /// Values below [`GENERATED_BASE`] are raised to it.
    pub fn starting_from(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start.max(GENERATED_BASE)),
        }
    }

    /// Allocate the next generated id.
    pub fn next_id(&self) -> Result<ExpressionId, StoreError> {
        let raw = self
            .next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_add(1))
            .map_err(|_| StoreError::IdSpaceExhausted)?;
        ExpressionId::new(raw).ok_or(StoreError::IdSpaceExhausted)
    }

    /// Return the next id that *would* be allocated, without consuming it.
    pub fn peek_next(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expression_id_niche_optimization() {
        assert_eq!(
            std::mem::size_of::<Option<ExpressionId>>(),
            std::mem::size_of::<ExpressionId>()
        );
    }

    #[test]
    fn zero_is_not_an_id() {
        assert!(ExpressionId::new(0).is_none());
        assert_eq!(ExpressionId::new(73211009).unwrap().get(), 73211009);
    }

    #[test]
    fn kind_follows_generated_base() {
        let sctid = ExpressionId::new(999_999_999_999_999_999).unwrap();
        assert_eq!(sctid.kind(), IdKind::Precoordinated);
        let generated = ExpressionId::new(GENERATED_BASE).unwrap();
        assert_eq!(generated.kind(), IdKind::Generated);
    }

    #[test]
    fn representative_key_prefers_precoordinated() {
        let pre = ExpressionId::new(900).unwrap();
        let pre_small = ExpressionId::new(12).unwrap();
        let generated = ExpressionId::new(GENERATED_BASE + 1).unwrap();
        let mut ids = vec![generated, pre, pre_small];
        ids.sort_by_key(|id| id.representative_key());
        assert_eq!(ids, vec![pre_small, pre, generated]);
    }

    #[test]
    fn allocator_produces_sequential_ids() {
        let alloc = IdAllocator::new();
        let a = alloc.next_id().unwrap();
        let b = alloc.next_id().unwrap();
        assert_eq!(a.get(), GENERATED_BASE);
        assert_eq!(b.get(), GENERATED_BASE + 1);
        assert_eq!(a.kind(), IdKind::Generated);
    }

    #[test]
    fn allocator_starting_from_is_clamped() {
        let alloc = IdAllocator::starting_from(5);
        assert_eq!(alloc.peek_next(), GENERATED_BASE);
        let alloc = IdAllocator::starting_from(GENERATED_BASE + 10);
        assert_eq!(alloc.next_id().unwrap().get(), GENERATED_BASE + 10);
    }

    #[test]
    fn allocator_exhaustion() {
        let alloc = IdAllocator::starting_from(u64::MAX);
        assert!(matches!(alloc.next_id(), Err(StoreError::IdSpaceExhausted)));
    }

    #[test]
    fn display_is_bare_number() {
        assert_eq!(ExpressionId::new(42).unwrap().to_string(), "42");
    }
}
