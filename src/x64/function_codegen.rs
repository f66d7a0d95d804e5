// This module wraps a generated expression body into a complete System V function. The body
// is produced first, so by the time FunctionCodegen assembles the image the number of spill
// slots, the callee-saved registers the allocator touched, whether stack-passed parameters
// are read and whether any foreign call is made are all known. When none of those apply the
// function is the body followed by ret. Otherwise the standard frame is built: push rbp,
// mov rbp rsp, an rsp adjustment covering spill slots and the callee-saved save area rounded
// to 16 bytes (keeping call sites aligned), and stores of the touched callee-saved registers;
// the epilogue restores them and tears the frame down. The body uses only position-independent
// rel32 branches, so it is copied in unchanged after the prologue.

//! Function prologue/epilogue assembly around an expression body.

use super::calling_convention::{FunctionFrame, RBP, RSP};
use super::code_buffer::FinalizedCode;
use super::encoder::{AluOp, Mem, Operand, X64Encoder};
use crate::core::error::CompileResult;
use crate::core::register_file::AsmReg;

/// Finished function image.
#[derive(Debug, Clone)]
pub struct AssembledFunction {
    pub bytes: Vec<u8>,
    pub frame_size: u32,
    pub prologue_size: usize,
    pub patched_branches: usize,
}

/// Frame bookkeeping for one function under construction.
#[derive(Debug, Default)]
pub struct FunctionCodegen {
    frame: FunctionFrame,
    saved_regs: Vec<AsmReg>,
    makes_calls: bool,
    uses_stack_params: bool,
}

impl FunctionCodegen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_spill_slot(&mut self) -> i32 {
        self.frame.allocate_spill_slot()
    }

    pub fn spill_slot_count(&self) -> u32 {
        self.frame.spill_slot_count()
    }

    /// Mark that this function makes calls.
    pub fn set_makes_calls(&mut self) {
        self.makes_calls = true;
    }

    pub fn makes_calls(&self) -> bool {
        self.makes_calls
    }

    /// Mark that parameters are read from the caller's stack area.
    pub fn set_uses_stack_params(&mut self) {
        self.uses_stack_params = true;
    }

    pub fn add_callee_saved_register(&mut self, reg: AsmReg) {
        if !self.saved_regs.contains(&reg) {
            self.saved_regs.push(reg);
        }
    }

    pub fn saved_registers(&self) -> &[AsmReg] {
        &self.saved_regs
    }

    pub fn needs_frame(&self) -> bool {
        self.frame.spill_slot_count() > 0
            || !self.saved_regs.is_empty()
            || self.makes_calls
            || self.uses_stack_params
    }

    /// Emit prologue, body and epilogue into a buffer of `capacity` bytes.
    pub fn assemble(&self, body: FinalizedCode, capacity: usize) -> CompileResult<AssembledFunction> {
        let mut encoder = X64Encoder::new(capacity);
        if !self.needs_frame() {
            encoder.emit_raw(&body.bytes)?;
            encoder.ret()?;
            return Ok(AssembledFunction {
                bytes: encoder.finalize()?.bytes,
                frame_size: 0,
                prologue_size: 0,
                patched_branches: body.patched_branches,
            });
        }

        let frame_size = self.frame.calculate_frame_size(self.saved_regs.len());
        self.emit_prologue(&mut encoder, frame_size)?;
        let prologue_size = encoder.len();
        encoder.emit_raw(&body.bytes)?;
        self.emit_epilogue(&mut encoder)?;

        log::debug!(
            "🧱 Frame: {} bytes, {} spill slots, {} saved registers",
            frame_size,
            self.frame.spill_slot_count(),
            self.saved_regs.len()
        );
        Ok(AssembledFunction {
            bytes: encoder.finalize()?.bytes,
            frame_size,
            prologue_size,
            patched_branches: body.patched_branches,
        })
    }

    fn emit_prologue(&self, encoder: &mut X64Encoder, frame_size: u32) -> CompileResult<()> {
        encoder.push(RBP)?;
        encoder.mov(RBP, Operand::Reg(RSP))?;
        if frame_size > 0 {
            encoder.alu(AluOp::Sub, RSP, Operand::Imm(frame_size as i32))?;
        }
        for (index, &reg) in self.saved_regs.iter().enumerate() {
            encoder.store(Mem::frame(self.frame.save_slot(index)), reg)?;
        }
        Ok(())
    }

    fn emit_epilogue(&self, encoder: &mut X64Encoder) -> CompileResult<()> {
        for (index, &reg) in self.saved_regs.iter().enumerate() {
            encoder.load(None, reg, Mem::frame(self.frame.save_slot(index)))?;
        }
        encoder.mov(RSP, Operand::Reg(RBP))?;
        encoder.pop(RBP)?;
        encoder.ret()
    }
}
