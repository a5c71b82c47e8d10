use sigil::RunInfo;

const USAGE: &str = "usage: sigil <program> [--mem BYTES] [--dump]";

fn main() {
    env_logger::init();

    let mut program_path = None;
    let mut memory_size = sigil::DEFAULT_MEMORY_SIZE;
    let mut dump = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--dump" {
            dump = true;
        } else if arg == "--mem" {
            let value = args.next().unwrap_or_else(|| {
                eprintln!("--mem needs a value\n{USAGE}");
                std::process::exit(1)
            });
            memory_size = value.parse().unwrap_or_else(|_| {
                eprintln!("--mem wants a byte count, got '{value}'");
                std::process::exit(1)
            });
        } else if arg.starts_with('-') {
            eprintln!("unknown flag '{arg}'\n{USAGE}");
            std::process::exit(1);
        } else if program_path.is_none() {
            program_path = Some(arg);
        } else {
            eprintln!("unexpected argument '{arg}'\n{USAGE}");
            std::process::exit(1);
        }
    }

    let Some(path) = program_path else {
        eprintln!("{USAGE}");
        std::process::exit(1);
    };

    log::info!("running '{path}'");
    let program = std::fs::read(&path).expect("failed to read program file");

    let info = RunInfo::builder()
        .program(program)
        .memory_size(memory_size)
        .dump(dump)
        .build();
    let report = sigil::run(info).unwrap();

    if let Some(fault) = report.fault {
        eprintln!("machine faulted at pc {}: {}", report.pc, fault);
        std::process::exit(1);
    }
}
