//! Execution core for the sigil register machine.
//!
//! A sigil program is a flat byte stream: single-byte ASCII opcodes followed
//! by their fixed operand bytes. The core fetches from a caller-owned memory
//! arena, mutates a 128-slot register file, a 256-slot port bank, and a
//! bounded call stack, and surfaces every failure as a halt status rather
//! than an error return.
//!
//! The crate deliberately stops at the instruction level: program generation,
//! file loading and device semantics live in the front-end crates.

mod fault;
mod machine;


pub use fault::Fault;
pub use machine::{Machine, PortBank};

/// Number of general-purpose registers.
///
/// Operand bytes are taken modulo this, so every ASCII byte below 0x80 names
/// a register directly (`b'a'` is always slot 97).
pub const NUM_REGS: usize = 128;

/// Number of I/O ports in the port bank.
pub const NUM_PORTS: usize = 256;

/// Call stack capacity, in saved return addresses.
pub const STACK_SIZE: usize = 256;

/// Register slot holding the program counter.
///
/// The PC is an ordinary register (the one named by `'.'`), so generic
/// register instructions can read and write it to perform jumps.
pub const PC_REG: usize = (b'.' as usize) % NUM_REGS;
