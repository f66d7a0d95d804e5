// This module implements CodeBuffer, the capacity-bounded byte sink that machine code is
// emitted into. Appends that would exceed the capacity fail with BufferOverflow and leave the
// buffer untouched. Labels are plain indices; a branch to a label that is not bound yet is
// emitted with a zero rel32 placeholder and recorded in a pending-patch list. finalize walks
// that list, writes every displacement relative to the end of its branch instruction in
// native byte order, and fails with UnresolvedLabel if any referenced label was never bound.

//! Append-only code buffer with labels and forward-branch patching.

use crate::core::error::{CompileError, CompileResult};

/// Branch target inside one [`CodeBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

impl Label {
    pub fn id(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingPatch {
    label: Label,
    /// Offset of the rel32 field.
    field: usize,
}

/// Finalized code with patch statistics.
#[derive(Debug, Clone)]
pub struct FinalizedCode {
    pub bytes: Vec<u8>,
    pub patched_branches: usize,
}

#[derive(Debug, Clone)]
pub struct CodeBuffer {
    bytes: Vec<u8>,
    capacity: usize,
    labels: Vec<Option<usize>>,
    pending: Vec<PendingPatch>,
}

impl CodeBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity.min(1 << 16)),
            capacity,
            labels: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Append raw bytes.
    pub fn emit(&mut self, bytes: &[u8]) -> CompileResult<()> {
        let requested = self.bytes.len() + bytes.len();
        if requested > self.capacity {
            return Err(CompileError::BufferOverflow {
                requested,
                capacity: self.capacity,
            });
        }
        self.bytes.extend_from_slice(bytes);
        Ok(())
    }

    pub fn create_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    /// Bind `label` to the current offset.
    pub fn bind_label(&mut self, label: Label) -> CompileResult<()> {
        if self.is_bound(label) {
            return Err(CompileError::Encoding {
                reason: format!("label L{} bound twice", label.0),
            });
        }
        let offset = self.bytes.len();
        let slot = self
            .labels
            .get_mut(label.0 as usize)
            .ok_or(CompileError::UnresolvedLabel { label: label.0 })?;
        *slot = Some(offset);
        Ok(())
    }

    pub fn is_bound(&self, label: Label) -> bool {
        matches!(self.labels.get(label.0 as usize), Some(Some(_)))
    }

    /// `jmp rel32` to `label`.
    pub fn emit_jump(&mut self, label: Label) -> CompileResult<()> {
        self.emit_branch(&[0xE9], label)
    }

    /// `jcc rel32` to `label`; `cc` is the 4-bit x86 condition code.
    pub fn emit_jcc(&mut self, cc: u8, label: Label) -> CompileResult<()> {
        self.emit_branch(&[0x0F, 0x80 | (cc & 0x0F)], label)
    }

    fn emit_branch(&mut self, opcode: &[u8], label: Label) -> CompileResult<()> {
        // Opcode and placeholder go in as one append so an overflow leaves no partial branch.
        let mut encoded = [0u8; 6];
        let len = opcode.len() + 4;
        encoded[..opcode.len()].copy_from_slice(opcode);
        self.emit(&encoded[..len])?;
        let field = self.bytes.len() - 4;
        self.pending.push(PendingPatch { label, field });
        Ok(())
    }

    /// Patch every recorded branch and return the finished bytes.
    pub fn finalize(mut self) -> CompileResult<FinalizedCode> {
        let patched_branches = self.pending.len();
        for patch in &self.pending {
            let target = self
                .labels
                .get(patch.label.0 as usize)
                .copied()
                .flatten()
                .ok_or(CompileError::UnresolvedLabel {
                    label: patch.label.0,
                })?;
            let end = patch.field + 4;
            let rel = target as i64 - end as i64;
            let rel = i32::try_from(rel).map_err(|_| CompileError::Encoding {
                reason: format!("branch to L{} out of rel32 range", patch.label.0),
            })?;
            self.bytes[patch.field..end].copy_from_slice(&rel.to_ne_bytes());
        }
        log::trace!("🔗 Patched {patched_branches} branches");
        Ok(FinalizedCode {
            bytes: self.bytes,
            patched_branches,
        })
    }
}
