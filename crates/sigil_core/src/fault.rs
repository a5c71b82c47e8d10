use thiserror::Error;

/// A terminal execution fault.
///
/// Faults are status, not control flow: the machine records the fault, sets
/// its halted flag and stops executing. They never unwind into the host.
/// A faulted machine stays halted until `load` or `reset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fault {
    /// The program counter (or a block-scan cursor) reached memory end
    /// during fetch.
    #[error("program counter ran past the end of memory")]
    OutOfBounds,
    /// The fetched opcode byte matches no instruction.
    #[error("invalid opcode byte")]
    InvalidOpcode,
    /// Divide or remainder with a zero divisor register.
    #[error("division by zero")]
    DivideByZero,
    /// A call was executed with the call stack already full.
    #[error("call stack overflow")]
    StackOverflow,
    /// A return was executed with the call stack empty.
    #[error("call stack underflow")]
    StackUnderflow,
    /// A block opener found no matching close marker before memory end.
    #[error("unterminated block")]
    UnmatchedBlock,
}
