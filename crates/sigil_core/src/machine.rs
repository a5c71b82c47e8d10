mod dispatch;

use std::collections::HashMap;

use crate::fault::Fault;
use crate::{NUM_PORTS, NUM_REGS, PC_REG, STACK_SIZE};

/// The I/O port bank: 256 abstract device registers.
///
/// The core assigns no meaning to any port. A host observes and injects
/// values through the sense/emit hooks; without hooks a port is plain
/// storage.
pub type PortBank = [u32; NUM_PORTS];

/// A host callback invoked around port access.
///
/// Receives the port index being touched and the whole port bank, so an
/// input hook can store a value just before the machine reads it and an
/// output hook can react to the value the machine just wrote.
type PortHook<'m> = Box<dyn FnMut(u8, &mut PortBank) + 'm>;

/// The sigil machine: register file, memory arena, port bank, call stack
/// and halt status.
///
/// Memory is borrowed from the caller for the machine's lifetime; its
/// contents at construction are treated as the loaded program. The effective
/// memory length is the largest power of two that fits the arena, so every
/// data address can be masked instead of bounds-checked.
///
/// A machine is single-threaded and not reentrant: port hooks run inline on
/// the executing thread and must not call back into `step` or `run`.
pub struct Machine<'m> {
    mem: &'m mut [u8],
    /// Effective memory length (power of two); `len - 1` is the address mask.
    len: usize,
    regs: [u32; NUM_REGS],
    ports: PortBank,
    stack: [u32; STACK_SIZE],
    depth: usize,
    halted: bool,
    fault: Option<Fault>,
    sense: Option<PortHook<'m>>,
    emit: Option<PortHook<'m>>,
    /// Memoized block scans: body-start address to resume address.
    /// Invalidated by any memory store, `load` or `reset`.
    scans: HashMap<u32, u32>,
}

impl<'m> Machine<'m> {
    /// Create a machine over a caller-owned memory arena.
    ///
    /// Arena lengths that are not a power of two are rounded down; the bytes
    /// past the rounded length are never addressed. Registers, ports, the
    /// call stack and the halt status all start cleared, with the PC at 0.
    pub fn new(mem: &'m mut [u8]) -> Self {
        let len = floor_pow2(mem.len());
        Machine {
            mem,
            len,
            regs: [0; NUM_REGS],
            ports: [0; NUM_PORTS],
            stack: [0; STACK_SIZE],
            depth: 0,
            halted: false,
            fault: None,
            sense: None,
            emit: None,
            scans: HashMap::new(),
        }
    }

    /// Copy a program into memory at address 0 and rewind.
    ///
    /// Programs longer than memory are silently truncated. Memory past the
    /// program keeps whatever it held before; only the PC and the halt
    /// status are reset, so registers and ports survive a reload.
    pub fn load(&mut self, program: &[u8]) {
        let n = program.len().min(self.len);
        self.mem[..n].copy_from_slice(&program[..n]);
        self.regs[PC_REG] = 0;
        self.halted = false;
        self.fault = None;
        self.scans.clear();
    }

    /// Clear registers, ports, the call stack and the halt status.
    ///
    /// Memory is left untouched, so `reset` followed by `run` re-executes
    /// whatever program is already loaded.
    pub fn reset(&mut self) {
        self.regs = [0; NUM_REGS];
        self.ports = [0; NUM_PORTS];
        self.depth = 0;
        self.halted = false;
        self.fault = None;
        self.scans.clear();
    }

    /// Install the hook invoked before a port read completes.
    pub fn on_sense(&mut self, hook: impl FnMut(u8, &mut PortBank) + 'm) {
        self.sense = Some(Box::new(hook));
    }

    /// Install the hook invoked after a port write completes.
    pub fn on_emit(&mut self, hook: impl FnMut(u8, &mut PortBank) + 'm) {
        self.emit = Some(Box::new(hook));
    }

    /// Execute one instruction: fetch the opcode, decode its operands and
    /// apply its effects. Does nothing on a halted machine.
    pub fn step(&mut self) {
        if self.halted {
            return;
        }
        let Some(op) = self.fetch() else { return };
        match dispatch::TABLE[op as usize] {
            Some(exec) => exec(self),
            None => self.raise(Fault::InvalidOpcode),
        }
    }

    /// Run until the machine halts.
    ///
    /// Blocking and synchronous; a program that never halts never returns.
    /// A host that wants a budget calls `step` in its own loop instead.
    pub fn run(&mut self) {
        while !self.halted {
            self.step();
        }
    }

    /// Fetch the byte at the PC and advance by one.
    ///
    /// Every decode goes through here, opcode bytes included, so a truncated
    /// or overrun program halts with a bounds fault instead of reading past
    /// the arena. Returns `None` once the machine has halted; the caller
    /// must abandon the current instruction without touching state.
    pub(crate) fn fetch(&mut self) -> Option<u8> {
        if self.halted {
            return None;
        }
        let pc = self.regs[PC_REG] as usize;
        if pc >= self.len {
            self.raise(Fault::OutOfBounds);
            return None;
        }
        self.regs[PC_REG] = self.regs[PC_REG].wrapping_add(1);
        Some(self.mem[pc])
    }

    /// Record a fault and halt.
    pub(crate) fn raise(&mut self, fault: Fault) {
        log::debug!("halt at pc {}: {}", self.regs[PC_REG], fault);
        self.halted = true;
        self.fault = Some(fault);
    }

    #[inline]
    pub(crate) fn set_pc(&mut self, addr: u32) {
        self.regs[PC_REG] = addr;
    }

    #[inline]
    pub(crate) fn set_reg(&mut self, index: u8, value: u32) {
        self.regs[index as usize % NUM_REGS] = value;
    }

    #[inline]
    pub(crate) fn mem_read(&self, addr: u32) -> u8 {
        self.mem[addr as usize & (self.len - 1)]
    }

    pub(crate) fn mem_write(&mut self, addr: u32, value: u8) {
        self.mem[addr as usize & (self.len - 1)] = value;
        // A store can rewrite a close marker, so cached scans are stale.
        if !self.scans.is_empty() {
            self.scans.clear();
        }
    }

    /// Push a return address. On a full stack, faults and pushes nothing.
    pub(crate) fn push(&mut self, addr: u32) -> bool {
        if self.depth == STACK_SIZE {
            self.raise(Fault::StackOverflow);
            return false;
        }
        self.stack[self.depth] = addr;
        self.depth += 1;
        true
    }

    /// Pop a return address. On an empty stack, faults and returns `None`.
    pub(crate) fn pop(&mut self) -> Option<u32> {
        if self.depth == 0 {
            self.raise(Fault::StackUnderflow);
            return None;
        }
        self.depth -= 1;
        Some(self.stack[self.depth])
    }

    /// Find the resume address for a block whose body starts at `body`:
    /// one past the first close marker carrying the same label byte.
    ///
    /// Successful scans are memoized per body address; `mem_write` drops the
    /// memo, so the cache never changes what a scan would observe.
    pub(crate) fn find_block_end(&mut self, body: u32, label: u8) -> Option<u32> {
        if let Some(&resume) = self.scans.get(&body) {
            return Some(resume);
        }
        let mut at = body as usize;
        while at + 1 < self.len {
            if self.mem[at] == dispatch::OP_BLOCK_CLOSE && self.mem[at + 1] == label {
                let resume = (at + 2) as u32;
                self.scans.insert(body, resume);
                return Some(resume);
            }
            at += 1;
        }
        None
    }

    /// Read a register by name; the index wraps modulo the register count.
    #[inline]
    pub fn reg(&self, index: u8) -> u32 {
        self.regs[index as usize % NUM_REGS]
    }

    /// The current program counter.
    #[inline]
    pub fn pc(&self) -> u32 {
        self.regs[PC_REG]
    }

    /// Read-only view of the register file.
    pub fn registers(&self) -> &[u32; NUM_REGS] {
        &self.regs
    }

    /// Read-only view of the port bank.
    pub fn ports(&self) -> &PortBank {
        &self.ports
    }

    /// Read-only view of the addressable memory.
    pub fn memory(&self) -> &[u8] {
        &self.mem[..self.len]
    }

    /// Whether the machine has halted, cleanly or on a fault.
    #[inline]
    pub fn halted(&self) -> bool {
        self.halted
    }

    /// The recorded fault, if the halt was not a clean terminate.
    #[inline]
    pub fn fault(&self) -> Option<Fault> {
        self.fault
    }
}

/// Largest power of two that fits in `n`, or 0 for an empty arena.
fn floor_pow2(n: usize) -> usize {
    if n == 0 {
        0
    } else {
        1usize << (usize::BITS - 1 - n.leading_zeros())
    }
}

#[cfg(test)]
mod state_tests {
    use super::*;

    #[test]
    fn new_machine_starts_cleared() {
        let mut mem = [0xffu8; 64];
        let vm = Machine::new(&mut mem);
        assert_eq!(vm.pc(), 0);
        assert!(!vm.halted());
        assert_eq!(vm.fault(), None);
        assert!(vm.registers().iter().all(|&r| r == 0));
        assert!(vm.ports().iter().all(|&p| p == 0));
        // The arena itself is the caller's: new() must not clear it.
        assert_eq!(vm.memory()[0], 0xff);
    }

    #[test]
    fn arena_length_rounds_down_to_power_of_two() {
        let mut mem = [0u8; 300];
        let vm = Machine::new(&mut mem);
        assert_eq!(vm.memory().len(), 256);
    }

    #[test]
    fn load_places_program_at_zero_and_rewinds() {
        let mut mem = [0u8; 64];
        let mut vm = Machine::new(&mut mem);
        vm.load(&[1, 2, 3]);
        assert_eq!(&vm.memory()[..3], &[1, 2, 3]);
        assert_eq!(vm.pc(), 0);
        assert!(!vm.halted());
    }

    #[test]
    fn load_truncates_overlong_programs() {
        let mut mem = [0u8; 8];
        let mut vm = Machine::new(&mut mem);
        vm.load(&[7u8; 32]);
        assert_eq!(vm.memory(), &[7u8; 8]);
    }

    #[test]
    fn load_leaves_trailing_memory_alone() {
        let mut mem = [0u8; 16];
        mem[10] = 0xab;
        let mut vm = Machine::new(&mut mem);
        vm.load(&[1, 2]);
        assert_eq!(vm.memory()[10], 0xab);
    }

    #[test]
    fn reset_clears_state_but_not_memory() {
        let mut mem = [0u8; 32];
        let mut vm = Machine::new(&mut mem);
        vm.load(&[b':', b'a', b'\'', 9, 0]);
        vm.run();
        assert_eq!(vm.reg(b'a'), 9);
        vm.reset();
        assert_eq!(vm.reg(b'a'), 0);
        assert!(!vm.halted());
        assert_eq!(vm.memory()[0], b':');
    }

    #[test]
    fn empty_arena_faults_on_first_fetch() {
        let mut mem: [u8; 0] = [];
        let mut vm = Machine::new(&mut mem);
        vm.step();
        assert_eq!(vm.fault(), Some(Fault::OutOfBounds));
    }

    #[test]
    fn stale_scan_memo_is_dropped_on_store() {
        let mut mem = [0u8; 32];
        mem[10] = b'}';
        mem[11] = b'L';
        let mut vm = Machine::new(&mut mem);
        assert_eq!(vm.find_block_end(2, b'L'), Some(12));
        // Overwrite the close marker; the memo must not survive.
        vm.mem_write(10, 0);
        assert_eq!(vm.find_block_end(2, b'L'), None);
    }
}
