//! Bytecode assembler for the sigil VM.
//!
//! A thin builder over the raw instruction encoding: one method per
//! instruction form, plus named labels with forward references. Target
//! addresses are loaded through the 4-byte word immediate, so a label
//! reference reserves a fixed-size slot that [`Assembler::finish`] patches
//! once every label is defined.
//!
//! ```
//! use sigil_asm::{Assembler, Rel};
//!
//! let mut asm = Assembler::new();
//! asm.load(b'n', 3);
//! asm.load(b'k', 1);
//! asm.label("top");
//! asm.load_label(b't', "top");
//! asm.sub(b'n', b'n', b'k');
//! asm.branch_if(Rel::Ne, b'n', b'z', b't');
//! asm.halt();
//! let program = asm.finish().unwrap();
//! assert_eq!(program[0], b':');
//! ```

use std::collections::HashMap;

use thiserror::Error;

/// Assembly failure, reported by [`Assembler::finish`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AsmError {
    #[error("undefined label `{0}`")]
    UndefinedLabel(String),
}

/// Comparison relations for the conditional instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rel {
    Eq,
    Ne,
    Gt,
    Lt,
}

impl Rel {
    fn byte(self) -> u8 {
        match self {
            Rel::Eq => b'=',
            Rel::Ne => b'!',
            Rel::Gt => b'>',
            Rel::Lt => b'<',
        }
    }
}

/// A pending reference to a not-yet-resolved label: the buffer offset of a
/// word-immediate payload to patch.
struct LabelRef {
    name: String,
    at: usize,
}

/// Incremental bytecode builder.
#[derive(Default)]
pub struct Assembler {
    buf: Vec<u8>,
    labels: HashMap<String, u32>,
    refs: Vec<LabelRef>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current emit address, i.e. where the next instruction will land.
    pub fn here(&self) -> u32 {
        self.buf.len() as u32
    }

    /// Append a raw byte. The instruction methods below are all built on
    /// this, and it doubles as an escape hatch for inline data.
    pub fn emit(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    /// Define `name` at the current address. Redefining a label moves it;
    /// the last definition wins.
    pub fn label(&mut self, name: &str) {
        self.labels.insert(name.to_string(), self.here());
    }

    /// `dest = value` (raw byte immediate).
    pub fn load(&mut self, dest: u8, value: u8) {
        self.emit_all(&[b':', dest, b'\'', value]);
    }

    /// `dest = value` (little-endian word immediate).
    pub fn load_word(&mut self, dest: u8, value: u32) {
        self.emit_all(&[b':', dest, b'w']);
        self.emit_all(&value.to_le_bytes());
    }

    /// `dest = address of label` — a word load whose payload is patched at
    /// [`finish`](Self::finish), so forward references are fine.
    pub fn load_label(&mut self, dest: u8, name: &str) {
        self.emit_all(&[b':', dest, b'w']);
        if let Some(&addr) = self.labels.get(name) {
            self.emit_all(&addr.to_le_bytes());
        } else {
            self.refs.push(LabelRef {
                name: name.to_string(),
                at: self.buf.len(),
            });
            self.emit_all(&[0; 4]);
        }
    }

    /// `dest = src`.
    pub fn copy(&mut self, dest: u8, src: u8) {
        self.emit_all(&[b':', dest, b'.', src]);
    }

    /// `dest = mem[src]`, one level of indirection through memory.
    pub fn copy_indirect(&mut self, dest: u8, src: u8) {
        self.emit_all(&[b':', dest, b'*', src]);
    }

    pub fn add(&mut self, dest: u8, a: u8, b: u8) {
        self.emit_all(&[b'+', dest, a, b]);
    }

    pub fn sub(&mut self, dest: u8, a: u8, b: u8) {
        self.emit_all(&[b'-', dest, a, b]);
    }

    pub fn mul(&mut self, dest: u8, a: u8, b: u8) {
        self.emit_all(&[b'*', dest, a, b]);
    }

    pub fn div(&mut self, dest: u8, a: u8, b: u8) {
        self.emit_all(&[b'/', dest, a, b]);
    }

    pub fn rem(&mut self, dest: u8, a: u8, b: u8) {
        self.emit_all(&[b'%', dest, a, b]);
    }

    pub fn and(&mut self, dest: u8, a: u8, b: u8) {
        self.emit_all(&[b'&', dest, a, b]);
    }

    pub fn or(&mut self, dest: u8, a: u8, b: u8) {
        self.emit_all(&[b'|', dest, a, b]);
    }

    pub fn xor(&mut self, dest: u8, a: u8, b: u8) {
        self.emit_all(&[b'^', dest, a, b]);
    }

    pub fn not(&mut self, dest: u8, src: u8) {
        self.emit_all(&[b'~', dest, src]);
    }

    pub fn shl(&mut self, dest: u8, a: u8, b: u8) {
        self.emit_all(&[b'<', dest, a, b]);
    }

    pub fn shr(&mut self, dest: u8, a: u8, b: u8) {
        self.emit_all(&[b'>', dest, a, b]);
    }

    /// `dest = mem[addr register]`.
    pub fn mem_load(&mut self, dest: u8, addr: u8) {
        self.emit_all(&[b'@', dest, addr]);
    }

    /// `mem[addr register] = src`.
    pub fn mem_store(&mut self, addr: u8, src: u8) {
        self.emit_all(&[b'!', addr, src]);
    }

    /// `dest = port[port register]`.
    pub fn port_read(&mut self, dest: u8, port: u8) {
        self.emit_all(&[b'(', dest, port]);
    }

    /// `port[port register] = src`.
    pub fn port_write(&mut self, port: u8, src: u8) {
        self.emit_all(&[b')', port, src]);
    }

    /// Jump to the address held in `target`.
    pub fn jump(&mut self, target: u8) {
        self.emit_all(&[b'.', target]);
    }

    /// Call the address held in `target`.
    pub fn call(&mut self, target: u8) {
        self.emit_all(&[b';', target]);
    }

    pub fn ret(&mut self) {
        self.emit(b',');
    }

    /// Capture the address of the following instruction into `dest`.
    pub fn mark(&mut self, dest: u8) {
        self.emit_all(&[b'#', dest]);
    }

    /// Skip the next opcode byte unless `rel` holds between `a` and `b`.
    pub fn skip_unless(&mut self, rel: Rel, a: u8, b: u8) {
        self.emit_all(&[b'?', rel.byte(), a, b]);
    }

    /// Jump to the address held in `target` when `rel` holds.
    pub fn branch_if(&mut self, rel: Rel, a: u8, b: u8, target: u8) {
        self.emit_all(&[b'=', rel.byte(), a, b, target]);
    }

    /// Open a structured block tagged with `label`.
    pub fn block_open(&mut self, label: u8) {
        self.emit_all(&[b'{', label]);
    }

    /// Close the structured block tagged with `label`.
    pub fn block_close(&mut self, label: u8) {
        self.emit_all(&[b'}', label]);
    }

    pub fn halt(&mut self) {
        self.emit(0);
    }

    /// Resolve outstanding label references and return the program bytes.
    pub fn finish(mut self) -> Result<Vec<u8>, AsmError> {
        for r in &self.refs {
            let addr = self
                .labels
                .get(&r.name)
                .ok_or_else(|| AsmError::UndefinedLabel(r.name.clone()))?;
            self.buf[r.at..r.at + 4].copy_from_slice(&addr.to_le_bytes());
        }
        Ok(self.buf)
    }

    fn emit_all(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigil_core::Machine;

    fn assemble_and_run(asm: Assembler) -> [u32; sigil_core::NUM_REGS] {
        let program = asm.finish().expect("labels resolve");
        let mut mem = vec![0u8; 1024];
        let mut vm = Machine::new(&mut mem);
        vm.load(&program);
        vm.run();
        assert_eq!(vm.fault(), None, "program faulted");
        *vm.registers()
    }

    #[test]
    fn encodes_register_forms() {
        let mut asm = Assembler::new();
        asm.load(b'a', 7);
        asm.add(b'c', b'a', b'b');
        asm.not(b'd', b'c');
        asm.ret();
        assert_eq!(
            asm.finish().unwrap(),
            vec![b':', b'a', b'\'', 7, b'+', b'c', b'a', b'b', b'~', b'd', b'c', b',']
        );
    }

    #[test]
    fn backward_label_resolves_inline() {
        let mut asm = Assembler::new();
        asm.label("start");
        asm.load_label(b't', "start");
        let program = asm.finish().unwrap();
        assert_eq!(u32::from_le_bytes(program[3..7].try_into().unwrap()), 0);
    }

    #[test]
    fn forward_label_is_patched_at_finish() {
        let mut asm = Assembler::new();
        asm.load_label(b't', "end");
        asm.halt();
        asm.label("end");
        let program = asm.finish().unwrap();
        assert_eq!(program.len(), 8);
        assert_eq!(&program[..3], &[b':', b't', b'w']);
        assert_eq!(u32::from_le_bytes(program[3..7].try_into().unwrap()), 8);
    }

    #[test]
    fn undefined_label_is_an_error() {
        let mut asm = Assembler::new();
        asm.load_label(b't', "nowhere");
        assert_eq!(
            asm.finish(),
            Err(AsmError::UndefinedLabel("nowhere".to_string()))
        );
    }

    #[test]
    fn countdown_loop_runs_on_the_vm() {
        // s = 5 + 4 + 3 + 2 + 1
        let mut asm = Assembler::new();
        asm.load(b'n', 5);
        asm.load(b'k', 1);
        asm.label("top");
        asm.load_label(b't', "top");
        asm.add(b's', b's', b'n');
        asm.sub(b'n', b'n', b'k');
        asm.branch_if(Rel::Ne, b'n', b'z', b't');
        asm.halt();
        let regs = assemble_and_run(asm);
        assert_eq!(regs[b's' as usize], 15);
        assert_eq!(regs[b'n' as usize], 0);
    }

    #[test]
    fn forward_call_into_a_subroutine() {
        let mut asm = Assembler::new();
        asm.load_label(b'f', "sub");
        asm.call(b'f');
        asm.load(b'c', 1);
        asm.halt();
        asm.label("sub");
        asm.load(b'x', 9);
        asm.ret();
        let regs = assemble_and_run(asm);
        assert_eq!(regs[b'x' as usize], 9);
        assert_eq!(regs[b'c' as usize], 1);
    }

    #[test]
    fn skipped_block_entered_once_by_captured_address() {
        // The block body doubles `v`. It is skipped on the way in, entered
        // once through the address the opener captured, and left through the
        // continuation captured by `mark`.
        let mut asm = Assembler::new();
        asm.load(b'k', 1);
        asm.load(b'v', 21);
        asm.load_label(b't', "end");
        asm.block_open(b'D');
        asm.add(b'v', b'v', b'v');
        asm.jump(b'r');
        asm.block_close(b'D');
        asm.mark(b'r');
        asm.branch_if(Rel::Eq, b'g', b'k', b't'); // second pass: done
        asm.load(b'g', 1);
        asm.jump(b'D');
        asm.label("end");
        asm.halt();
        let regs = assemble_and_run(asm);
        assert_eq!(regs[b'v' as usize], 42);
        assert_eq!(regs[b'g' as usize], 1);
    }
}
