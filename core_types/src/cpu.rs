//! Processor core identifiers and core sets

use core::fmt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest number of cores a [`CpuSet`] can describe.
pub const MAX_CORES: usize = 32;

/// Identifier for a CPU core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CoreId(pub usize);

impl CoreId {
    /// Returns the core index
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Core({})", self.0)
    }
}

/// Error building a [`CpuSet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CpuSetError {
    /// The core index does not fit in the set
    #[error("core index {0} exceeds the {max} supported cores", max = MAX_CORES)]
    CoreOutOfRange(usize),
}

/// A set of cores, one bit per core index.
///
/// Used for task affinity masks and for the sets of cores currently holding
/// the scheduler lock or the interrupt lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CpuSet(u32);

impl CpuSet {
    /// The empty set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// The set of the first `count` cores (saturating at [`MAX_CORES`])
    pub const fn first(count: usize) -> Self {
        if count >= MAX_CORES {
            Self(u32::MAX)
        } else {
            Self((1u32 << count) - 1)
        }
    }

    /// A set holding exactly one core
    pub fn single(core: CoreId) -> Result<Self, CpuSetError> {
        let mut set = Self::empty();
        set.insert(core)?;
        Ok(set)
    }

    /// Builds a set from a list of core indices
    pub fn from_cores(cores: &[usize]) -> Result<Self, CpuSetError> {
        let mut set = Self::empty();
        for &core in cores {
            set.insert(CoreId(core))?;
        }
        Ok(set)
    }

    /// Builds a set from its raw bitmask
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw bitmask
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Adds a core to the set
    pub fn insert(&mut self, core: CoreId) -> Result<(), CpuSetError> {
        if core.0 >= MAX_CORES {
            return Err(CpuSetError::CoreOutOfRange(core.0));
        }
        self.0 |= 1 << core.0;
        Ok(())
    }

    /// Removes a core from the set; out-of-range cores are never members
    pub fn remove(&mut self, core: CoreId) {
        if core.0 < MAX_CORES {
            self.0 &= !(1 << core.0);
        }
    }

    /// Returns true if the core is a member
    pub const fn contains(self, core: CoreId) -> bool {
        core.0 < MAX_CORES && self.0 & (1 << core.0) != 0
    }

    /// Returns true if no core is a member
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of member cores
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Cores present in both sets
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// The set without the given core
    pub fn without(self, core: CoreId) -> Self {
        let mut set = self;
        set.remove(core);
        set
    }

    /// Iterates member cores in ascending index order
    pub fn iter(self) -> CpuSetIter {
        CpuSetIter { bits: self.0 }
    }
}

impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, core) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", core.0)?;
        }
        write!(f, "}}")
    }
}

impl IntoIterator for CpuSet {
    type Item = CoreId;
    type IntoIter = CpuSetIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Ascending iterator over the cores of a [`CpuSet`]
#[derive(Debug, Clone)]
pub struct CpuSetIter {
    bits: u32,
}

impl Iterator for CpuSetIter {
    type Item = CoreId;

    fn next(&mut self) -> Option<CoreId> {
        if self.bits == 0 {
            return None;
        }
        let index = self.bits.trailing_zeros() as usize;
        self.bits &= self.bits - 1;
        Some(CoreId(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_cores() {
        assert_eq!(CpuSet::first(0), CpuSet::empty());
        assert_eq!(CpuSet::first(3).bits(), 0b111);
        assert_eq!(CpuSet::first(MAX_CORES).bits(), u32::MAX);
        assert_eq!(CpuSet::first(MAX_CORES + 4).len(), MAX_CORES);
    }

    #[test]
    fn test_insert_remove_contains() {
        let mut set = CpuSet::empty();
        set.insert(CoreId(2)).unwrap();
        set.insert(CoreId(5)).unwrap();
        assert!(set.contains(CoreId(2)));
        assert!(!set.contains(CoreId(3)));
        set.remove(CoreId(2));
        assert!(!set.contains(CoreId(2)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_out_of_range_core_rejected() {
        let mut set = CpuSet::empty();
        assert_eq!(
            set.insert(CoreId(MAX_CORES)),
            Err(CpuSetError::CoreOutOfRange(MAX_CORES))
        );
        assert!(!set.contains(CoreId(40)));
    }

    #[test]
    fn test_iter_ascending() {
        let set = CpuSet::from_cores(&[7, 1, 4]).unwrap();
        let cores: Vec<CoreId> = set.iter().collect();
        assert_eq!(cores, vec![CoreId(1), CoreId(4), CoreId(7)]);
    }

    #[test]
    fn test_without_and_intersection() {
        let a = CpuSet::from_cores(&[0, 1, 2]).unwrap();
        let b = CpuSet::from_cores(&[1, 2, 3]).unwrap();
        assert_eq!(a.intersection(b), CpuSet::from_cores(&[1, 2]).unwrap());
        assert_eq!(a.without(CoreId(1)), CpuSet::from_cores(&[0, 2]).unwrap());
        assert!(CpuSet::single(CoreId(0)).unwrap().without(CoreId(0)).is_empty());
    }

    #[test]
    fn test_display() {
        let set = CpuSet::from_cores(&[0, 3]).unwrap();
        assert_eq!(format!("{}", set), "{0,3}");
        assert_eq!(format!("{}", CoreId(2)), "Core(2)");
    }

    #[test]
    fn test_serde_roundtrip() {
        let set = CpuSet::from_cores(&[1, 2]).unwrap();
        let json = serde_json::to_string(&set).unwrap();
        let back: CpuSet = serde_json::from_str(&json).unwrap();
        assert_eq!(set, back);
    }
}
