//! Console front-end for the sigil VM.
//!
//! Wires three well-known ports to the process's standard streams and runs a
//! program to completion. The core knows nothing about these ports; the
//! assignments here are just this front-end's convention.

use std::io::{Read, Write};

use anyhow::Result;
use sigil_core::{Fault, Machine};
use typed_builder::TypedBuilder;

/// Writes to this port go to stdout.
pub const CONSOLE_OUT: u8 = b'o';
/// Reads from this port pull one byte from stdin (0 on EOF).
pub const CONSOLE_IN: u8 = b'c';
/// Writes to this port go to stderr.
pub const CONSOLE_ERR: u8 = b'e';

/// Default memory arena size (64 KiB).
pub const DEFAULT_MEMORY_SIZE: usize = 0x10000;

#[derive(TypedBuilder)]
pub struct RunInfo {
    pub program: Vec<u8>,
    #[builder(default = DEFAULT_MEMORY_SIZE)]
    pub memory_size: usize,
    /// Hexdump the memory arena after the run.
    #[builder(default = false)]
    pub dump: bool,
}

/// Final state of a finished run.
pub struct RunReport {
    pub fault: Option<Fault>,
    pub pc: u32,
}

/// Run a program to completion with the console ports attached.
pub fn run(info: RunInfo) -> Result<RunReport> {
    let mut mem = vec![0u8; info.memory_size];
    let mut vm = Machine::new(&mut mem);
    vm.load(&info.program);
    log::info!(
        "loaded {} program bytes into a {} byte arena",
        info.program.len(),
        info.memory_size
    );

    vm.on_sense(|port, ports| {
        if port == CONSOLE_IN {
            let mut byte = [0u8; 1];
            ports[port as usize] = match std::io::stdin().read(&mut byte) {
                Ok(1) => byte[0] as u32,
                _ => 0,
            };
        }
    });
    vm.on_emit(|port, ports| {
        let byte = [ports[port as usize] as u8];
        let result = match port {
            CONSOLE_OUT => std::io::stdout()
                .write_all(&byte)
                .and_then(|_| std::io::stdout().flush()),
            CONSOLE_ERR => std::io::stderr().write_all(&byte),
            _ => Ok(()),
        };
        if let Err(err) = result {
            log::warn!("console write on port {port} failed: {err}");
        }
    });

    vm.run();
    let report = RunReport {
        fault: vm.fault(),
        pc: vm.pc(),
    };
    if info.dump {
        print!("{}", sigil_common::hexdump(vm.memory()));
    }
    Ok(report)
}
