//! Opcode dispatch and instruction semantics.
//!
//! Opcodes are printable ASCII sigils; the table below maps each byte to its
//! handler. Operand bytes always name registers (taken modulo the register
//! count) except for immediate payloads and block labels, which are raw.
//! All arithmetic is unsigned 32-bit with silent wraparound.
//!
//! Handlers decode every operand before mutating anything, so an instruction
//! cut off by the end of memory halts the machine without partial effects.

use lazy_static::lazy_static;

use super::Machine;
use crate::fault::Fault;

/// Close marker for structured blocks; the block-open scan looks for this
/// byte followed by the matching label.
pub(super) const OP_BLOCK_CLOSE: u8 = b'}';

type Handler = for<'m> fn(&mut Machine<'m>);

lazy_static! {
    /// Opcode byte to handler. Bytes with no entry are invalid opcodes.
    pub(super) static ref TABLE: [Option<Handler>; 256] = build_table();
}

fn build_table() -> [Option<Handler>; 256] {
    let mut t: [Option<Handler>; 256] = [None; 256];
    let mut set = |op: u8, h: Handler| t[op as usize] = Some(h);

    // Terminate and formatting no-ops.
    set(0, op_halt);
    for ws in [b' ', b'\t', b'\n', b'\r', 0x0c] {
        set(ws, op_nop);
    }

    // Arithmetic.
    set(b'+', op_add);
    set(b'-', op_sub);
    set(b'*', op_mul);
    set(b'/', op_div);
    set(b'%', op_rem);

    // Bitwise.
    set(b'&', op_and);
    set(b'|', op_or);
    set(b'^', op_xor);
    set(b'~', op_not);
    set(b'<', op_shl);
    set(b'>', op_shr);

    // Immediate loads.
    set(b':', op_imm);

    // Memory.
    set(b'@', op_mem_load);
    set(b'!', op_mem_store);

    // Ports.
    set(b'(', op_port_read);
    set(b')', op_port_write);

    // Control flow.
    set(b'.', op_jump);
    set(b'?', op_skip);
    set(b'=', op_branch);
    set(b';', op_call);
    set(b',', op_ret);
    set(b'#', op_mark);
    set(b'{', op_block_open);
    set(OP_BLOCK_CLOSE, op_block_close);

    t
}

fn op_nop(_: &mut Machine) {}

fn op_halt(m: &mut Machine) {
    m.halted = true;
}

/// Three-operand register form: `dest = f(a, b)`.
fn alu3(m: &mut Machine, f: fn(u32, u32) -> u32) {
    let (Some(d), Some(a), Some(b)) = (m.fetch(), m.fetch(), m.fetch()) else {
        return;
    };
    let value = f(m.reg(a), m.reg(b));
    m.set_reg(d, value);
}

fn op_add(m: &mut Machine) {
    alu3(m, |a, b| a.wrapping_add(b));
}

fn op_sub(m: &mut Machine) {
    alu3(m, |a, b| a.wrapping_sub(b));
}

fn op_mul(m: &mut Machine) {
    alu3(m, |a, b| a.wrapping_mul(b));
}

fn op_and(m: &mut Machine) {
    alu3(m, |a, b| a & b);
}

fn op_or(m: &mut Machine) {
    alu3(m, |a, b| a | b);
}

fn op_xor(m: &mut Machine) {
    alu3(m, |a, b| a ^ b);
}

// The shift amount is the full register value, not masked to 0..32;
// amounts of 32 or more yield 0.

fn op_shl(m: &mut Machine) {
    alu3(m, |a, b| a.checked_shl(b).unwrap_or(0));
}

fn op_shr(m: &mut Machine) {
    alu3(m, |a, b| a.checked_shr(b).unwrap_or(0));
}

/// `/` and `%`: a zero divisor halts with a division fault and leaves the
/// destination untouched.
fn divmod(m: &mut Machine, f: fn(u32, u32) -> u32) {
    let (Some(d), Some(a), Some(b)) = (m.fetch(), m.fetch(), m.fetch()) else {
        return;
    };
    let divisor = m.reg(b);
    if divisor == 0 {
        m.raise(Fault::DivideByZero);
        return;
    }
    m.set_reg(d, f(m.reg(a), divisor));
}

fn op_div(m: &mut Machine) {
    divmod(m, |a, b| a / b);
}

fn op_rem(m: &mut Machine) {
    divmod(m, |a, b| a % b);
}

fn op_not(m: &mut Machine) {
    let (Some(d), Some(a)) = (m.fetch(), m.fetch()) else {
        return;
    };
    let value = !m.reg(a);
    m.set_reg(d, value);
}

/// `:` dest mode payload — immediate loads.
///
/// Modes: `'` raw byte, `d` decimal digit, `x` hex digit (either case),
/// `w` little-endian 4-byte word, `.` register copy, `*` copy through
/// memory (dest = mem[src register]). Digit modes convert without
/// validating, matching the raw-byte spirit of the ISA.
fn op_imm(m: &mut Machine) {
    let (Some(d), Some(mode)) = (m.fetch(), m.fetch()) else {
        return;
    };
    let value = match mode {
        b'\'' => {
            let Some(v) = m.fetch() else { return };
            v as u32
        }
        b'd' => {
            let Some(v) = m.fetch() else { return };
            v.wrapping_sub(b'0') as u32
        }
        b'x' => {
            let Some(v) = m.fetch() else { return };
            hex_value(v)
        }
        b'w' => {
            let (Some(b0), Some(b1), Some(b2), Some(b3)) =
                (m.fetch(), m.fetch(), m.fetch(), m.fetch())
            else {
                return;
            };
            u32::from_le_bytes([b0, b1, b2, b3])
        }
        b'.' => {
            let Some(s) = m.fetch() else { return };
            m.reg(s)
        }
        b'*' => {
            let Some(s) = m.fetch() else { return };
            m.mem_read(m.reg(s)) as u32
        }
        _ => {
            m.raise(Fault::InvalidOpcode);
            return;
        }
    };
    m.set_reg(d, value);
}

fn hex_value(digit: u8) -> u32 {
    if digit.is_ascii_digit() {
        (digit - b'0') as u32
    } else {
        ((digit & 0xdf).wrapping_sub(b'A')) as u32 + 10
    }
}

fn op_mem_load(m: &mut Machine) {
    let (Some(d), Some(a)) = (m.fetch(), m.fetch()) else {
        return;
    };
    let value = m.mem_read(m.reg(a)) as u32;
    m.set_reg(d, value);
}

fn op_mem_store(m: &mut Machine) {
    let (Some(a), Some(s)) = (m.fetch(), m.fetch()) else {
        return;
    };
    let addr = m.reg(a);
    let value = m.reg(s) as u8;
    m.mem_write(addr, value);
}

// Port operands name a register whose value, masked to the bank size, is
// the port index. The sense hook runs before the read so a host can model
// input availability; the emit hook runs after the write so it observes the
// stored value.

fn op_port_read(m: &mut Machine) {
    let (Some(d), Some(p)) = (m.fetch(), m.fetch()) else {
        return;
    };
    let port = m.reg(p) as u8;
    if let Some(hook) = m.sense.as_mut() {
        hook(port, &mut m.ports);
    }
    let value = m.ports[port as usize];
    m.set_reg(d, value);
}

fn op_port_write(m: &mut Machine) {
    let (Some(p), Some(s)) = (m.fetch(), m.fetch()) else {
        return;
    };
    let port = m.reg(p) as u8;
    m.ports[port as usize] = m.reg(s);
    if let Some(hook) = m.emit.as_mut() {
        hook(port, &mut m.ports);
    }
}

fn op_jump(m: &mut Machine) {
    let Some(t) = m.fetch() else { return };
    m.set_pc(m.reg(t));
}

fn relation(rel: u8, a: u32, b: u32) -> Option<bool> {
    match rel {
        b'=' => Some(a == b),
        b'!' => Some(a != b),
        b'>' => Some(a > b),
        b'<' => Some(a < b),
        _ => None,
    }
}

/// `?` rel a b — when the relation does not hold, skip exactly one opcode
/// byte. The skip only moves the PC; if it lands past memory end the next
/// fetch raises the bounds fault.
fn op_skip(m: &mut Machine) {
    let (Some(rel), Some(a), Some(b)) = (m.fetch(), m.fetch(), m.fetch()) else {
        return;
    };
    let Some(holds) = relation(rel, m.reg(a), m.reg(b)) else {
        m.raise(Fault::InvalidOpcode);
        return;
    };
    if !holds {
        m.set_pc(m.pc().wrapping_add(1));
    }
}

/// `=` rel a b target — when the relation holds, jump to the target
/// register's value; otherwise fall through.
fn op_branch(m: &mut Machine) {
    let (Some(rel), Some(a), Some(b), Some(t)) = (m.fetch(), m.fetch(), m.fetch(), m.fetch())
    else {
        return;
    };
    let Some(holds) = relation(rel, m.reg(a), m.reg(b)) else {
        m.raise(Fault::InvalidOpcode);
        return;
    };
    if holds {
        m.set_pc(m.reg(t));
    }
}

fn op_call(m: &mut Machine) {
    let Some(t) = m.fetch() else { return };
    if !m.push(m.pc()) {
        return;
    }
    m.set_pc(m.reg(t));
}

fn op_ret(m: &mut Machine) {
    let Some(addr) = m.pop() else { return };
    m.set_pc(addr);
}

/// `#` dest — capture the address of the next instruction, the anchor for
/// a later backward jump.
fn op_mark(m: &mut Machine) {
    let Some(d) = m.fetch() else { return };
    let here = m.pc();
    m.set_reg(d, here);
}

/// `{` label — record the body-start address in the label register, then
/// resume past the matching close marker. Nested blocks are told apart only
/// by their label byte; reuse is the program's problem, not the engine's.
fn op_block_open(m: &mut Machine) {
    let Some(label) = m.fetch() else { return };
    let body = m.pc();
    m.set_reg(label, body);
    match m.find_block_end(body, label) {
        Some(resume) => m.set_pc(resume),
        None => m.raise(Fault::UnmatchedBlock),
    }
}

/// `}` label — reached by falling out of a re-entered block; consumes its
/// label byte and continues.
fn op_block_close(m: &mut Machine) {
    let _ = m.fetch();
}
