// This module implements the RegisterFile that performs register allocation for the expression
// code generator. Registers are split into two disjoint classes (general purpose and float/XMM)
// and every class has an explicit allocation order supplied by the target: free registers are
// handed out in that order, and when a class is full a per-class clock walks the same order
// to pick an eviction victim. Only registers owned by a value can be evicted; temporaries and
// locked registers never are. The caller receives the evicted value index and is responsible
// for emitting the spill store. Every register that was ever handed out is remembered in a
// cumulative "touched" set so the prologue can save the callee-saved ones. Snapshots capture
// occupancy so conditional arms can be generated from an identical starting state.

//! Register allocation and management.
//!
//! Clock-based allocation with on-demand spilling, tracked with bitsets.

use super::value_assignment::ValLocalIdx;
use thiserror::Error;

/// Maximum number of register banks supported (GP, FP).
pub const MAX_REGISTER_BANKS: usize = 2;

/// Maximum number of registers per bank.
pub const MAX_REGISTERS_PER_BANK: usize = 16;

/// Type for register bank indices.
pub type RegBank = u8;

/// Type for register IDs within a bank.
pub type RegId = u8;

/// Register class; the discriminant is the bank index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegClass {
    General = 0,
    Float = 1,
}

impl RegClass {
    pub const fn bank(self) -> RegBank {
        self as RegBank
    }
}

/// Combined register identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AsmReg {
    pub bank: RegBank,
    pub id: RegId,
}

impl AsmReg {
    pub const fn new(bank: RegBank, id: RegId) -> Self {
        Self { bank, id }
    }

    /// General purpose register by hardware number.
    pub const fn gp(id: RegId) -> Self {
        Self::new(RegClass::General.bank(), id)
    }

    /// XMM register by hardware number.
    pub const fn xmm(id: RegId) -> Self {
        Self::new(RegClass::Float.bank(), id)
    }

    pub fn class(&self) -> RegClass {
        if self.bank == RegClass::Float.bank() {
            RegClass::Float
        } else {
            RegClass::General
        }
    }

    /// Get the linear register index for array indexing.
    pub fn linear_index(&self) -> usize {
        (self.bank as usize) * MAX_REGISTERS_PER_BANK + (self.id as usize)
    }
}

/// Bit set for efficiently tracking register sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegBitSet {
    banks: [u64; MAX_REGISTER_BANKS],
}

impl RegBitSet {
    /// Create empty register set.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_regs(regs: &[AsmReg]) -> Self {
        let mut set = Self::new();
        for &reg in regs {
            set.set(reg);
        }
        set
    }

    /// Check if register is set.
    pub fn contains(&self, reg: AsmReg) -> bool {
        if reg.bank as usize >= MAX_REGISTER_BANKS || reg.id >= 64 {
            return false;
        }
        (self.banks[reg.bank as usize] & (1u64 << reg.id)) != 0
    }

    /// Set a register.
    pub fn set(&mut self, reg: AsmReg) {
        if (reg.bank as usize) < MAX_REGISTER_BANKS && reg.id < 64 {
            self.banks[reg.bank as usize] |= 1u64 << reg.id;
        }
    }

    /// Clear a register.
    pub fn clear(&mut self, reg: AsmReg) {
        if (reg.bank as usize) < MAX_REGISTER_BANKS && reg.id < 64 {
            self.banks[reg.bank as usize] &= !(1u64 << reg.id);
        }
    }

    /// Set union with another set.
    pub fn union(&mut self, other: &RegBitSet) {
        for i in 0..MAX_REGISTER_BANKS {
            self.banks[i] |= other.banks[i];
        }
    }

    /// Registers of the set in bank order.
    pub fn iter(&self) -> impl Iterator<Item = AsmReg> + '_ {
        (0..MAX_REGISTER_BANKS as RegBank).flat_map(move |bank| {
            (0..64u8)
                .filter(move |id| self.banks[bank as usize] & (1u64 << id) != 0)
                .map(move |id| AsmReg::new(bank, id))
        })
    }
}

/// Who currently occupies a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegOwner {
    /// An expression value that can be spilled on eviction.
    Value(ValLocalIdx),
    /// A scratch claim of the current instruction sequence.
    Temp,
}

/// Result of an allocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub reg: AsmReg,
    /// Value that was evicted from `reg`; its contents are still in the register.
    pub evicted: Option<ValLocalIdx>,
}

/// Error types for register allocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegAllocError {
    #[error("no {0:?} register available")]
    NoRegistersAvailable(RegClass),
    #[error("register {0:?} is not allocated")]
    RegisterNotAllocated(AsmReg),
    #[error("register {0:?} is already allocated")]
    RegisterInUse(AsmReg),
    #[error("register {0:?} is not allocatable")]
    InvalidRegister(AsmReg),
    #[error("lock count underflow on {0:?}")]
    LockCountUnderflow(AsmReg),
}

impl From<RegAllocError> for crate::core::error::CompileError {
    fn from(err: RegAllocError) -> Self {
        crate::core::error::CompileError::RegisterAllocation {
            reason: err.to_string(),
        }
    }
}

/// Occupancy state captured by [`RegisterFile::snapshot`].
#[derive(Debug, Clone)]
pub struct RegisterSnapshot {
    used: RegBitSet,
    fixed: RegBitSet,
    clocks: [usize; MAX_REGISTER_BANKS],
    owners: Vec<Option<RegOwner>>,
    lock_counts: Vec<u8>,
}

/// RegisterFile manages register allocation for a single function.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    /// Allocation order per class.
    order: [Vec<AsmReg>; MAX_REGISTER_BANKS],
    /// Registers available for allocation (excludes SP, BP and scratch registers).
    allocatable: RegBitSet,
    /// Currently allocated registers.
    used: RegBitSet,
    /// Registers that cannot be evicted (locked).
    fixed: RegBitSet,
    /// Every register handed out so far; survives snapshot restores.
    touched: RegBitSet,

    /// Clock position (index into `order`) for eviction in each bank.
    clocks: [usize; MAX_REGISTER_BANKS],
    owners: Vec<Option<RegOwner>>,
    lock_counts: Vec<u8>,

    allocations: usize,
}

impl RegisterFile {
    /// Create a register file that allocates in the given per-class orders.
    pub fn new(gp_order: &[AsmReg], fp_order: &[AsmReg]) -> Self {
        let mut allocatable = RegBitSet::from_regs(gp_order);
        allocatable.union(&RegBitSet::from_regs(fp_order));
        let total = MAX_REGISTER_BANKS * MAX_REGISTERS_PER_BANK;

        Self {
            order: [gp_order.to_vec(), fp_order.to_vec()],
            allocatable,
            used: RegBitSet::new(),
            fixed: RegBitSet::new(),
            touched: RegBitSet::new(),
            clocks: [0; MAX_REGISTER_BANKS],
            owners: vec![None; total],
            lock_counts: vec![0; total],
            allocations: 0,
        }
    }

    /// Allocate a register of `class` for `owner`.
    ///
    /// `preferred` is taken when it is a free register of `class`; other free
    /// registers are taken in allocation order. Otherwise the clock selects an
    /// unlocked value-owned register; the evicted value is reported so the
    /// caller can spill it before the register is reused.
    pub fn allocate(
        &mut self,
        class: RegClass,
        owner: RegOwner,
        preferred: Option<AsmReg>,
    ) -> Result<Allocation, RegAllocError> {
        let hinted = preferred
            .filter(|&reg| self.order[class as usize].contains(&reg) && !self.used.contains(reg));
        if let Some(reg) = hinted.or_else(|| self.find_free(class)) {
            self.assign(reg, owner);
            return Ok(Allocation { reg, evicted: None });
        }

        if let Some(reg) = self.find_clocked_evictable(class) {
            let evicted = match self.owners[reg.linear_index()] {
                Some(RegOwner::Value(idx)) => Some(idx),
                _ => None,
            };
            self.assign(reg, owner);
            log::trace!("🔁 Evicting {:?} from {:?}", evicted, reg);
            return Ok(Allocation { reg, evicted });
        }

        Err(RegAllocError::NoRegistersAvailable(class))
    }

    fn find_free(&self, class: RegClass) -> Option<AsmReg> {
        self.order[class as usize]
            .iter()
            .copied()
            .find(|&reg| !self.used.contains(reg))
    }

    /// Find evictable register using clock algorithm.
    fn find_clocked_evictable(&mut self, class: RegClass) -> Option<AsmReg> {
        let bank = class as usize;
        let len = self.order[bank].len();
        for _ in 0..len {
            let reg = self.order[bank][self.clocks[bank] % len];
            self.clocks[bank] = (self.clocks[bank] + 1) % len;

            let value_owned = matches!(
                self.owners[reg.linear_index()],
                Some(RegOwner::Value(_))
            );
            if value_owned && !self.fixed.contains(reg) {
                return Some(reg);
            }
        }
        None
    }

    fn assign(&mut self, reg: AsmReg, owner: RegOwner) {
        self.used.set(reg);
        self.touched.set(reg);
        self.owners[reg.linear_index()] = Some(owner);
        self.lock_counts[reg.linear_index()] = 0;
        self.fixed.clear(reg);
        self.allocations += 1;
    }

    /// Claim a specific free register.
    pub fn take(&mut self, reg: AsmReg, owner: RegOwner) -> Result<(), RegAllocError> {
        if !self.allocatable.contains(reg) {
            return Err(RegAllocError::InvalidRegister(reg));
        }
        if self.used.contains(reg) {
            return Err(RegAllocError::RegisterInUse(reg));
        }
        self.assign(reg, owner);
        Ok(())
    }

    /// Change the owner of an allocated register without emitting code.
    pub fn reassign(&mut self, reg: AsmReg, owner: RegOwner) -> Result<(), RegAllocError> {
        if !self.used.contains(reg) {
            return Err(RegAllocError::RegisterNotAllocated(reg));
        }
        self.owners[reg.linear_index()] = Some(owner);
        Ok(())
    }

    /// Free a register without spilling.
    pub fn free(&mut self, reg: AsmReg) -> Result<(), RegAllocError> {
        if !self.used.contains(reg) {
            return Err(RegAllocError::RegisterNotAllocated(reg));
        }
        self.used.clear(reg);
        self.fixed.clear(reg);
        self.owners[reg.linear_index()] = None;
        self.lock_counts[reg.linear_index()] = 0;
        Ok(())
    }

    /// Lock a register to prevent eviction.
    pub fn lock(&mut self, reg: AsmReg) -> Result<(), RegAllocError> {
        if !self.used.contains(reg) {
            return Err(RegAllocError::RegisterNotAllocated(reg));
        }
        self.lock_counts[reg.linear_index()] += 1;
        self.fixed.set(reg);
        Ok(())
    }

    /// Unlock a register, allowing eviction when lock count reaches zero.
    pub fn unlock(&mut self, reg: AsmReg) -> Result<(), RegAllocError> {
        let idx = reg.linear_index();
        if self.lock_counts[idx] == 0 {
            return Err(RegAllocError::LockCountUnderflow(reg));
        }
        self.lock_counts[idx] -= 1;
        if self.lock_counts[idx] == 0 {
            self.fixed.clear(reg);
        }
        Ok(())
    }

    pub fn owner(&self, reg: AsmReg) -> Option<RegOwner> {
        self.owners.get(reg.linear_index()).copied().flatten()
    }

    pub fn is_allocated(&self, reg: AsmReg) -> bool {
        self.used.contains(reg)
    }

    pub fn is_locked(&self, reg: AsmReg) -> bool {
        self.fixed.contains(reg)
    }

    pub fn is_allocatable(&self, reg: AsmReg) -> bool {
        self.allocatable.contains(reg)
    }

    /// Allocated registers of `class` in allocation order.
    pub fn allocated_in(&self, class: RegClass) -> Vec<AsmReg> {
        self.order[class as usize]
            .iter()
            .copied()
            .filter(|&reg| self.used.contains(reg))
            .collect()
    }

    /// Registers of `candidates` that were handed out at any point.
    pub fn touched_among(&self, candidates: &[AsmReg]) -> Vec<AsmReg> {
        candidates
            .iter()
            .copied()
            .filter(|&reg| self.touched.contains(reg))
            .collect()
    }

    /// Number of allocations served so far.
    pub fn allocation_count(&self) -> usize {
        self.allocations
    }

    pub fn snapshot(&self) -> RegisterSnapshot {
        RegisterSnapshot {
            used: self.used.clone(),
            fixed: self.fixed.clone(),
            clocks: self.clocks,
            owners: self.owners.clone(),
            lock_counts: self.lock_counts.clone(),
        }
    }

    /// Restore occupancy; the touched set and counters are kept.
    pub fn restore(&mut self, snapshot: &RegisterSnapshot) {
        self.used = snapshot.used.clone();
        self.fixed = snapshot.fixed.clone();
        self.clocks = snapshot.clocks;
        self.owners.clone_from(&snapshot.owners);
        self.lock_counts.clone_from(&snapshot.lock_counts);
    }
}
