//! `emu` — command-line front end for the POSIX syscall emulator.
//!
//! Builds an `EmuOptions` from flags (optionally layered over a
//! `--config` TOML file), constructs a `GuestProcess`, and calls
//! `run()`. The actual instruction-level `CpuEngine` is an external
//! collaborator this crate doesn't implement; until one is linked in,
//! `run()` is driven with `NullEngine`, which never fires the syscall
//! hook at all (its `hook_code`/`emu_start` are no-ops) — enough to
//! smoke-test construction and argument plumbing, not to run a guest.

use anyhow::{Context, Result};
use clap::Parser;
use emu_core::{Arch, GuestOs, HostOs, NullEngine};
use exo_init_server::{EmuOptions, GuestProcess, Output, SyscallDispatcher};
use exo_vfs_server::StdioMode;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "emu")]
#[command(about = "Run a POSIX guest binary under the syscall emulator")]
struct Cli {
    /// Optional TOML file providing default EmuOptions; flags below
    /// override whatever it sets.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root of the guest filesystem.
    #[arg(long)]
    rootfs: Option<PathBuf>,

    /// A guest path prefix mapped to a host path, `GUEST=HOST`;
    /// repeatable, checked longest-prefix-first ahead of `--rootfs`.
    #[arg(long = "mount", value_name = "GUEST=HOST")]
    mounts: Vec<String>,

    /// Guest CPU architecture: arm, arm64, x86, x86_64, mips32el.
    #[arg(long)]
    arch: Option<String>,

    /// Guest OS personality: linux, macos, freebsd, windows.
    #[arg(long)]
    platform: Option<String>,

    /// Run the guest as root (unprivileged_id returns 0 rather than 1000).
    #[arg(long)]
    root: bool,

    /// Repeatable: -v for Debug output, -vv for Dump, -vvv for Disasm.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// The guest binary and its argv, after `--`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    guest_argv: Vec<String>,
}

fn parse_arch(s: &str) -> Result<Arch> {
    Ok(match s {
        "arm" => Arch::Arm,
        "arm64" | "aarch64" => Arch::Arm64,
        "x86" | "i386" => Arch::X86,
        "x86_64" | "x8664" | "amd64" => Arch::X8664,
        "mips32el" | "mipsel" => Arch::Mips32El,
        other => anyhow::bail!("unknown --arch {other:?}"),
    })
}

fn parse_platform(s: &str) -> Result<GuestOs> {
    Ok(match s {
        "linux" => GuestOs::Linux,
        "macos" | "darwin" => GuestOs::Macos,
        "freebsd" => GuestOs::Freebsd,
        "windows" => GuestOs::Windows,
        other => anyhow::bail!("unknown --platform {other:?}"),
    })
}

fn output_for(verbosity: u8) -> Output {
    match verbosity {
        0 => Output::Default,
        1 => Output::Debug,
        2 => Output::Dump,
        _ => Output::Disasm,
    }
}

fn parse_mount(raw: &str) -> Result<(String, PathBuf)> {
    let (guest, host) = raw
        .split_once('=')
        .with_context(|| format!("--mount {raw:?} is not GUEST=HOST"))?;
    Ok((guest.to_string(), PathBuf::from(host)))
}

fn install_logger(options: &EmuOptions) {
    if options.output == Output::Off {
        return;
    }
    let level = match options.output {
        Output::Off => unreachable!(),
        Output::Default => log::LevelFilter::Info,
        Output::Debug => log::LevelFilter::Debug,
        Output::Dump | Output::Disasm => log::LevelFilter::Trace,
    };
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    if let Some(path) = &options.log_file {
        if let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
    }
    builder.init();
}

fn build_options(cli: &Cli) -> Result<EmuOptions> {
    let mut options = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        }
        None => EmuOptions {
            rootfs: PathBuf::from("/"),
            mounts: Vec::new(),
            arch: Arch::X8664,
            host_os: if cfg!(target_os = "macos") { HostOs::Macos } else { HostOs::Linux },
            guest_os: GuestOs::Linux,
            libcache: true,
            output: Output::Default,
            log_file: None,
            root: false,
            stdio: StdioMode::Host,
        },
    };

    if let Some(rootfs) = &cli.rootfs {
        options.rootfs = rootfs.clone();
    }
    for raw in &cli.mounts {
        options.mounts.push(parse_mount(raw)?);
    }
    if let Some(arch) = &cli.arch {
        options.arch = parse_arch(arch)?;
    }
    if let Some(platform) = &cli.platform {
        options.guest_os = parse_platform(platform)?;
    }
    if cli.root {
        options.root = true;
    }
    if cli.verbose > 0 {
        options.output = output_for(cli.verbose);
    }
    if cli.log_file.is_some() {
        options.log_file = cli.log_file.clone();
    }

    Ok(options)
}

/// Conventional load addresses used when no real loader has placed the
/// guest image yet; a concrete `CpuEngine`/loader pair would supply the
/// binary's actual mapped `brk`/`mmap` bases instead.
const DEFAULT_BRK_BASE: u64 = 0x0000_0000_1000_0000;
const DEFAULT_MMAP_BASE: u64 = 0x0000_7fff_f000_0000;
const DEFAULT_ENTRY: u64 = 0x0000_0000_0040_0000;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let options = build_options(&cli)?;
    install_logger(&options);

    let binary_path = cli.guest_argv.first().cloned().unwrap_or_default();
    let argv = cli.guest_argv.clone();
    let env: Vec<String> = std::env::vars().map(|(k, v)| format!("{k}={v}")).collect();

    let mut process = GuestProcess::new(argv, env, binary_path, DEFAULT_BRK_BASE, DEFAULT_MMAP_BASE, &options)
        .context("constructing guest process")?;
    let dispatcher = SyscallDispatcher::build(options.guest_os, options.arch);
    let mut engine = NullEngine::new();

    let code = process.run(&mut engine, &dispatcher, DEFAULT_ENTRY).context("running guest")?;
    std::process::exit(code);
}
