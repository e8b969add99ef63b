use clap::{ArgAction, Parser};
use indicatif::ProgressBar;
use log::{LevelFilter, Log, Metadata, Record, warn};
use squashfs_inspect::{Flags, InodePointer, SquashfsError, Superblock, Volume, WalkOptions};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// Squashfs metadata inspector
#[derive(Parser, Debug)]
#[command(name = "sqfsinspect")]
#[command(version, about, long_about = None)]
#[command(arg_required_else_help = true)]
struct Arguments {
    /// Path to the squashfs image
    image: PathBuf,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Suppress logging and the progress spinner
    #[arg(short, long)]
    quiet: bool,

    /// Deepest directory nesting that is still expanded
    #[arg(long, default_value_t = WalkOptions::DEFAULT_MAX_DEPTH)]
    max_depth: usize,

    /// Report corrupt subtrees and continue instead of aborting
    #[arg(short, long)]
    keep_going: bool,
}

struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

fn init_logging(arguments: &Arguments) {
    let level = match (arguments.quiet, arguments.verbose) {
        (true, _) => LevelFilter::Off,
        (false, 0) => LevelFilter::Warn,
        (false, 1) => LevelFilter::Info,
        (false, 2) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    };

    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

fn number_line(name: &str, value: u64) -> String {
    format!("{:<30} {:#10x} {:10}", name, value, value)
}

fn print_superblock(out: &mut impl Write, superblock: &Superblock) -> io::Result<()> {
    match superblock.compression() {
        Some(compression) => writeln!(out, "compression {}", compression)?,
        None => writeln!(out, "compression unknown ({})", superblock.compressor_id())?,
    }
    let (major, minor) = superblock.version();
    writeln!(out, "version {}.{}", major, minor)?;
    writeln!(out, "mod time {}", superblock.modification_time())?;

    let names: Vec<_> = superblock
        .flags()
        .iter_names()
        .map(|(name, _)| name)
        .collect();
    let unknown = superblock.flags().bits() & !Flags::all().bits();
    write!(out, "flags [{}]", names.join(", "))?;
    if unknown != 0 {
        write!(out, " unknown {:#06x}", unknown)?;
    }
    writeln!(out)?;

    let root = superblock.root_inode();
    let numbers = [
        ("root inode block", root.block() as u64),
        ("root inode offset", root.offset() as u64),
        ("filesystem size", superblock.bytes_used()),
        ("inodes", superblock.inode_count() as u64),
        ("blocksize", superblock.block_size() as u64),
        ("fragment count", superblock.fragment_count() as u64),
        ("id count", superblock.id_count() as u64),
        ("id table start", superblock.id_table_start()),
        ("xattr table start", superblock.xattr_table_start()),
        ("inode table start", superblock.inode_table_start()),
        ("directory table start", superblock.directory_table_start()),
        ("fragment table start", superblock.fragment_table_start()),
        ("export table start", superblock.export_table_start()),
    ];
    for (name, value) in numbers {
        writeln!(out, "{}", number_line(name, value))?;
    }

    Ok(())
}

fn print_listing(out: &mut impl Write, pointers: &[InodePointer]) -> io::Result<()> {
    writeln!(
        out,
        "{:<30}: {:>4} {:>20}, {:>20}, {:>20}, {:>20}, {:>8}",
        "path",
        "type",
        "Inode Hex Block/Offset",
        "Inode Decimal Block/Offset",
        "Dir Hex Block/Offset",
        "Dir Decimal Block/Offset",
        "Dir Size"
    )?;

    for pointer in pointers {
        write!(
            out,
            "{:<30}: {:>4} {:#10x} {:#10x} , {:10} {:10}",
            pointer.path.display(),
            pointer.inode_type,
            pointer.block,
            pointer.offset,
            pointer.block,
            pointer.offset
        )?;
        if let Some(dir) = pointer.directory {
            write!(
                out,
                ", {:#10x} {:#10x} , {:10} {:10}, {:8}",
                dir.block, dir.offset, dir.block, dir.offset, dir.size
            )?;
        }
        writeln!(out)?;
    }

    Ok(())
}

fn create_spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    pb.set_message("Walking directory tree...");
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn run(arguments: &Arguments) -> Result<usize, SquashfsError> {
    let mut volume = Volume::open(&arguments.image)?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    print_superblock(&mut out, volume.superblock())?;

    let options = WalkOptions {
        max_depth: arguments.max_depth,
    };
    let spinner = create_spinner(arguments.quiet);
    let mut pointers = Vec::new();
    let mut failures = 0;

    for item in volume.walker(options) {
        match item {
            Ok(pointer) => {
                spinner.inc(1);
                pointers.push(pointer);
            }
            Err(e) if arguments.keep_going => {
                spinner.suspend(|| warn!("skipping: {}", e));
                failures += 1;
            }
            Err(e) => {
                spinner.finish_and_clear();
                return Err(e);
            }
        }
    }
    spinner.finish_with_message(format!("Found {} entries", pointers.len()));

    writeln!(out)?;
    print_listing(&mut out, &pointers)?;
    out.flush()?;

    Ok(failures)
}

fn main() -> ExitCode {
    let arguments = Arguments::parse();
    init_logging(&arguments);

    match run(&arguments) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failures) => {
            eprintln!("{} subtrees could not be read", failures);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error reading {}: {}", arguments.image.display(), e);
            ExitCode::FAILURE
        }
    }
}
