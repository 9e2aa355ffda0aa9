//! The three-dimensional resource vector used throughout the simulation.

use serde::{Deserialize, Serialize};

/// A `(VCPUs, MemoryMB, LocalGB)` tuple.
///
/// Instantiated with `u64` for exact bookkeeping and with `f64` for the
/// placement score.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BinpackVector<T> {
    pub vcpus: T,
    pub memory_mb: T,
    pub local_gb: T,
}

impl<T> BinpackVector<T> {
    pub fn new(vcpus: T, memory_mb: T, local_gb: T) -> Self {
        Self {
            vcpus,
            memory_mb,
            local_gb,
        }
    }
}

impl BinpackVector<u64> {
    pub fn add(self, other: Self) -> Self {
        Self {
            vcpus: self.vcpus + other.vcpus,
            memory_mb: self.memory_mb + other.memory_mb,
            local_gb: self.local_gb + other.local_gb,
        }
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self {
            vcpus: self.vcpus.saturating_sub(other.vcpus),
            memory_mb: self.memory_mb.saturating_sub(other.memory_mb),
            local_gb: self.local_gb.saturating_sub(other.local_gb),
        }
    }

    /// Whether this vector fits into `other` in every component.
    pub fn fits_in(self, other: Self) -> bool {
        self.vcpus <= other.vcpus
            && self.memory_mb <= other.memory_mb
            && self.local_gb <= other.local_gb
    }

    pub fn scale(self, count: u64) -> Self {
        Self {
            vcpus: self.vcpus * count,
            memory_mb: self.memory_mb * count,
            local_gb: self.local_gb * count,
        }
    }

    pub fn any_is_zero(self) -> bool {
        self.vcpus == 0 || self.memory_mb == 0 || self.local_gb == 0
    }

    pub fn to_float(self) -> BinpackVector<f64> {
        BinpackVector {
            vcpus: self.vcpus as f64,
            memory_mb: self.memory_mb as f64,
            local_gb: self.local_gb as f64,
        }
    }
}

impl BinpackVector<f64> {
    /// Component-wise division.
    pub fn div(self, other: Self) -> Self {
        Self {
            vcpus: self.vcpus / other.vcpus,
            memory_mb: self.memory_mb / other.memory_mb,
            local_gb: self.local_gb / other.local_gb,
        }
    }

    pub fn dot(self, other: Self) -> f64 {
        self.vcpus * other.vcpus + self.memory_mb * other.memory_mb + self.local_gb * other.local_gb
    }

    pub fn mul_scalar(self, factor: f64) -> Self {
        Self {
            vcpus: self.vcpus * factor,
            memory_mb: self.memory_mb * factor,
            local_gb: self.local_gb * factor,
        }
    }

    pub fn to_uint(self) -> BinpackVector<u64> {
        BinpackVector {
            vcpus: self.vcpus.max(0.0) as u64,
            memory_mb: self.memory_mb.max(0.0) as u64,
            local_gb: self.local_gb.max(0.0) as u64,
        }
    }
}

/// Multiplier for logical-to-physical core conversion.
///
/// Only cores have overcommit; a factor above 1 lets logical cores
/// over-allocate the physical ones.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OvercommitFactor(pub f64);

impl Default for OvercommitFactor {
    fn default() -> Self {
        Self(1.0)
    }
}

impl OvercommitFactor {
    pub fn is_neutral(self) -> bool {
        self.0 == 1.0
    }

    /// Physical capacity to logical capacity.
    pub fn apply_to(self, capacity: u64) -> u64 {
        (capacity as f64 * self.0) as u64
    }

    /// Logical demand to the physical capacity it consumes.
    pub fn apply_in_reverse(self, demand: u64) -> u64 {
        (demand as f64 / self.0) as u64
    }
}
