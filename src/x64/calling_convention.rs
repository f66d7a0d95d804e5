// This module implements the System V AMD64 calling convention as used by generated entry
// points and foreign calls. GP arguments pass in RDI, RSI, RDX, RCX, R8, R9, float arguments
// in XMM0-XMM7, and the rest go to consecutive 8-byte stack slots; results come back in RAX
// or XMM0. RBX and R12-R15 are callee-saved, every XMM register is caller-saved. The module
// also fixes the register allocation orders (caller-saved first so short leaf expressions
// never need a save area), the two reserved scratch registers R11 and XMM15, and the
// FunctionFrame that hands out rbp-relative spill slots and computes the aligned frame size.

//! System V x86-64 calling convention and frame layout.

use crate::core::register_file::{AsmReg, RegClass};

pub const RAX: AsmReg = AsmReg::gp(0);
pub const RCX: AsmReg = AsmReg::gp(1);
pub const RDX: AsmReg = AsmReg::gp(2);
pub const RBX: AsmReg = AsmReg::gp(3);
pub const RSP: AsmReg = AsmReg::gp(4);
pub const RBP: AsmReg = AsmReg::gp(5);
pub const RSI: AsmReg = AsmReg::gp(6);
pub const RDI: AsmReg = AsmReg::gp(7);
pub const R8: AsmReg = AsmReg::gp(8);
pub const R9: AsmReg = AsmReg::gp(9);
pub const R10: AsmReg = AsmReg::gp(10);
pub const R11: AsmReg = AsmReg::gp(11);
pub const R12: AsmReg = AsmReg::gp(12);
pub const R13: AsmReg = AsmReg::gp(13);
pub const R14: AsmReg = AsmReg::gp(14);
pub const R15: AsmReg = AsmReg::gp(15);

pub const XMM0: AsmReg = AsmReg::xmm(0);
pub const XMM15: AsmReg = AsmReg::xmm(15);

/// GP scratch register; never handed out by the allocator.
pub const SCRATCH_GP: AsmReg = R11;
/// XMM scratch register; never handed out by the allocator.
pub const SCRATCH_FP: AsmReg = XMM15;

/// GP argument registers in order.
pub const GP_ARG_REGS: [AsmReg; 6] = [RDI, RSI, RDX, RCX, R8, R9];

/// Number of XMM argument registers (XMM0-XMM7).
pub const FP_ARG_COUNT: u8 = 8;

pub const CALLEE_SAVED_GP: [AsmReg; 5] = [RBX, R12, R13, R14, R15];

pub const CALLER_SAVED_GP: [AsmReg; 9] = [RAX, RCX, RDX, RSI, RDI, R8, R9, R10, R11];

/// GP allocation order: caller-saved first, then callee-saved.
pub const GP_ALLOCATION_ORDER: [AsmReg; 13] =
    [RAX, RCX, RDX, RSI, RDI, R8, R9, R10, RBX, R12, R13, R14, R15];

/// XMM allocation order (XMM15 is reserved as scratch).
pub fn fp_allocation_order() -> Vec<AsmReg> {
    (0..15).map(AsmReg::xmm).collect()
}

pub fn return_register(class: RegClass) -> AsmReg {
    match class {
        RegClass::General => RAX,
        RegClass::Float => XMM0,
    }
}

/// Whether a call may clobber the GP register `reg`.
pub fn is_caller_saved(reg: AsmReg) -> bool {
    CALLER_SAVED_GP.contains(&reg)
}

/// Where an argument is passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgLocation {
    Register(AsmReg),
    /// Byte offset within the argument area on the stack.
    Stack(i32),
}

/// Calling convention assigner trait.
pub trait CCAssigner {
    /// Assign the next argument of `class`.
    fn assign_arg(&mut self, class: RegClass) -> ArgLocation;

    /// Bytes of stack argument area used so far.
    fn stack_size(&self) -> u32;
}

/// System V assigner.
#[derive(Debug, Clone, Default)]
pub struct SysVAssigner {
    gp_used: usize,
    fp_used: u8,
    stack_size: u32,
}

impl SysVAssigner {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CCAssigner for SysVAssigner {
    fn assign_arg(&mut self, class: RegClass) -> ArgLocation {
        match class {
            RegClass::General if self.gp_used < GP_ARG_REGS.len() => {
                self.gp_used += 1;
                ArgLocation::Register(GP_ARG_REGS[self.gp_used - 1])
            }
            RegClass::Float if self.fp_used < FP_ARG_COUNT => {
                self.fp_used += 1;
                ArgLocation::Register(AsmReg::xmm(self.fp_used - 1))
            }
            _ => {
                let offset = self.stack_size as i32;
                self.stack_size += 8;
                ArgLocation::Stack(offset)
            }
        }
    }

    fn stack_size(&self) -> u32 {
        self.stack_size
    }
}

/// Round up to the 16-byte stack alignment.
pub fn align_stack(bytes: u32) -> u32 {
    (bytes + 15) & !15
}

/// Stack frame layout management.
///
/// Spill slots grow downwards from `rbp - 8`; the callee-saved save area
/// sits directly below the last spill slot.
#[derive(Debug, Clone, Default)]
pub struct FunctionFrame {
    spill_slots: u32,
}

impl FunctionFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a fresh 8-byte spill slot and return its rbp offset.
    pub fn allocate_spill_slot(&mut self) -> i32 {
        self.spill_slots += 1;
        -8 * self.spill_slots as i32
    }

    pub fn spill_slot_count(&self) -> u32 {
        self.spill_slots
    }

    /// rbp offset of the save slot for the `index`-th saved register.
    pub fn save_slot(&self, index: usize) -> i32 {
        -8 * (self.spill_slots as i32 + index as i32 + 1)
    }

    /// Bytes to subtract from rsp after `push rbp; mov rbp, rsp`.
    pub fn calculate_frame_size(&self, saved_regs: usize) -> u32 {
        align_stack(8 * (self.spill_slots + saved_regs as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_arguments() {
        let mut assigner = SysVAssigner::new();
        let locations: Vec<_> = (0..8)
            .map(|_| assigner.assign_arg(RegClass::General))
            .collect();
        assert_eq!(locations[0], ArgLocation::Register(RDI));
        assert_eq!(locations[3], ArgLocation::Register(RCX));
        assert_eq!(locations[5], ArgLocation::Register(R9));
        assert_eq!(locations[6], ArgLocation::Stack(0));
        assert_eq!(locations[7], ArgLocation::Stack(8));
        assert_eq!(assigner.stack_size(), 16);
    }

    #[test]
    fn test_mixed_arguments() {
        let mut assigner = SysVAssigner::new();
        assert_eq!(
            assigner.assign_arg(RegClass::Float),
            ArgLocation::Register(XMM0)
        );
        assert_eq!(
            assigner.assign_arg(RegClass::General),
            ArgLocation::Register(RDI)
        );
        for _ in 0..7 {
            assigner.assign_arg(RegClass::Float);
        }
        assert_eq!(assigner.assign_arg(RegClass::Float), ArgLocation::Stack(0));
        assert_eq!(
            assigner.assign_arg(RegClass::General),
            ArgLocation::Register(RSI)
        );
        assert_eq!(assigner.stack_size(), 8);
    }

    #[test]
    fn test_frame_layout() {
        let mut frame = FunctionFrame::new();
        assert_eq!(frame.calculate_frame_size(0), 0);
        assert_eq!(frame.allocate_spill_slot(), -8);
        assert_eq!(frame.allocate_spill_slot(), -16);
        assert_eq!(frame.allocate_spill_slot(), -24);
        assert_eq!(frame.save_slot(0), -32);
        assert_eq!(frame.calculate_frame_size(0), 32);
        assert_eq!(frame.calculate_frame_size(2), 48);
    }

    #[test]
    fn test_register_sets() {
        assert!(!GP_ALLOCATION_ORDER.contains(&SCRATCH_GP));
        assert!(!GP_ALLOCATION_ORDER.contains(&RSP));
        assert!(!GP_ALLOCATION_ORDER.contains(&RBP));
        assert!(!fp_allocation_order().contains(&SCRATCH_FP));
        assert!(!is_caller_saved(R12));
        assert!(is_caller_saved(R10));
        assert!(is_caller_saved(SCRATCH_GP));
        assert_eq!(return_register(RegClass::Float), XMM0);
    }
}
