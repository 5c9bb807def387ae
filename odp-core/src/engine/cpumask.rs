//! CPU mask value type.
//!
//! The canonical string form is lower-case hex with a `0x` prefix and no
//! leading zeros (`0x1` for CPU 0, `0x20` for CPU 5). This is the form the
//! native runtime expects after `-c`.

use std::fmt;
use std::str::FromStr;

use nix::sched::CpuSet;

use crate::error::{Error, Result};

/// Highest number of CPUs a mask can describe.
pub const MAX_CPUS: usize = libc::CPU_SETSIZE as usize;

const WORD_BITS: usize = u64::BITS as usize;
const WORDS: usize = MAX_CPUS / WORD_BITS;

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CpuMask {
    words: [u64; WORDS],
}

impl CpuMask {
    pub fn new() -> Self {
        Self { words: [0; WORDS] }
    }

    /// Mask containing exactly one CPU.
    pub fn single(cpu: usize) -> Result<Self> {
        let mut mask = Self::new();
        mask.set(cpu)?;
        Ok(mask)
    }

    pub fn set(&mut self, cpu: usize) -> Result<()> {
        if cpu >= MAX_CPUS {
            return Err(Error::CpuMask(format!("cpu {cpu} out of range (max {MAX_CPUS})")));
        }
        self.words[cpu / WORD_BITS] |= 1u64 << (cpu % WORD_BITS);
        Ok(())
    }

    pub fn is_set(&self, cpu: usize) -> bool {
        cpu < MAX_CPUS && self.words[cpu / WORD_BITS] & (1u64 << (cpu % WORD_BITS)) != 0
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Lowest-numbered CPU in the mask.
    pub fn first(&self) -> Option<usize> {
        self.words
            .iter()
            .enumerate()
            .find(|(_, w)| **w != 0)
            .map(|(i, w)| i * WORD_BITS + w.trailing_zeros() as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_CPUS).filter(move |cpu| self.is_set(*cpu))
    }

    /// Render the canonical `0x…` form. An empty mask has no valid rendering.
    pub fn to_hex(&self) -> Result<String> {
        let top = self
            .words
            .iter()
            .rposition(|w| *w != 0)
            .ok_or_else(|| Error::CpuMask("cannot render an empty mask".into()))?;

        let mut out = format!("0x{:x}", self.words[top]);
        for word in self.words[..top].iter().rev() {
            out.push_str(&format!("{word:016x}"));
        }
        Ok(out)
    }

    pub fn from_cpuset(set: &CpuSet) -> Self {
        let mut mask = Self::new();
        let limit = CpuSet::count().min(MAX_CPUS);
        for cpu in 0..limit {
            if set.is_set(cpu).unwrap_or(false) {
                mask.words[cpu / WORD_BITS] |= 1u64 << (cpu % WORD_BITS);
            }
        }
        mask
    }

    pub fn to_cpuset(&self) -> Result<CpuSet> {
        let mut set = CpuSet::new();
        for cpu in self.iter() {
            set.set(cpu)
                .map_err(|e| Error::CpuMask(format!("cpu {cpu} not representable: {e}")))?;
        }
        Ok(set)
    }
}

impl Default for CpuMask {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromStr for CpuMask {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.is_empty() {
            return Err(Error::CpuMask(format!("empty mask string {s:?}")));
        }
        if digits.len() > MAX_CPUS / 4 {
            return Err(Error::CpuMask(format!("mask string {s:?} too long")));
        }

        let mut mask = Self::new();
        for (nibble_idx, c) in digits.chars().rev().enumerate() {
            let nibble = c
                .to_digit(16)
                .ok_or_else(|| Error::CpuMask(format!("invalid hex digit {c:?} in {s:?}")))?
                as u64;
            let bit = nibble_idx * 4;
            mask.words[bit / WORD_BITS] |= nibble << (bit % WORD_BITS);
        }
        Ok(mask)
    }
}
