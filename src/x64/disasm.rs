// Disassembly helpers used for trace logging of compiled functions, by the exprjit-stats
// binary and by encoder tests that compare emitted bytes against the iced CodeAssembler.
// Decoding uses the iced Decoder in 64-bit mode and renders NASM syntax.

//! NASM-syntax disassembly of emitted code.

use iced_x86::{Decoder, DecoderOptions, Formatter, Instruction, NasmFormatter};

/// Decode `bytes` into one NASM line per instruction.
pub fn instructions(bytes: &[u8]) -> Vec<String> {
    let mut decoder = Decoder::with_ip(64, bytes, 0, DecoderOptions::NONE);
    let mut formatter = NasmFormatter::new();
    let mut instruction = Instruction::default();
    let mut lines = Vec::new();
    while decoder.can_decode() {
        decoder.decode_out(&mut instruction);
        let mut text = String::new();
        formatter.format(&instruction, &mut text);
        lines.push(text);
    }
    lines
}

/// Address-annotated listing of code loaded at `address`.
pub fn listing(bytes: &[u8], address: u64) -> String {
    let mut decoder = Decoder::with_ip(64, bytes, address, DecoderOptions::NONE);
    let mut formatter = NasmFormatter::new();
    let mut instruction = Instruction::default();
    let mut out = String::new();
    let mut text = String::new();
    while decoder.can_decode() {
        decoder.decode_out(&mut instruction);
        text.clear();
        formatter.format(&instruction, &mut text);
        let start = (instruction.ip() - address) as usize;
        let raw: String = bytes[start..start + instruction.len()]
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect();
        out.push_str(&format!("{:016X} {raw:<24} {text}\n", instruction.ip()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_simple_function() {
        // mov rax, rdi; add rax, rsi; ret
        let bytes = [0x48, 0x89, 0xF8, 0x48, 0x01, 0xF0, 0xC3];
        let lines = instructions(&bytes);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("mov"));
        assert!(lines[1].starts_with("add"));
        assert_eq!(lines[2], "ret");
    }

    #[test]
    fn test_listing_has_addresses() {
        let text = listing(&[0x90, 0xC3], 0x1000);
        assert!(text.contains("0000000000001000"));
        assert!(text.contains("0000000000001001"));
    }
}
