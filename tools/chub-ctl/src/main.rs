//! chub-ctl - drive a simulated ContextHub through the AP driver
//!
//! Commands:
//! - `chub-ctl boot` - Download firmware, boot, print the resolved map
//! - `chub-ctl status` - Boot and print the link status report
//! - `chub-ctl utc list|run <id|name>` - List or run firmware diagnostics
//! - `chub-ctl ipc-test <payload>` - Round-trip a payload through the CHUB
//! - `chub-ctl dump --out <file>` - Capture a crash dump and save it
//! - `chub-ctl cycle` - Repeat shutdown + reset and report each boot

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chub_driver::{
    ChubConfig, ChubLink, DebugFs, DumpReason, LinkState, LogRestart, SimBoard, SimBoardConfig,
};
use chub_ipc::utc::{self, UTC_CHECK_STATUS, UTC_COMMANDS};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "chub-ctl")]
#[command(version)]
#[command(about = "Boot and exercise a simulated ContextHub", long_about = None)]
struct Cli {
    /// Driver and simulator settings (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot the CHUB and print the resolved memory map
    Boot,

    /// Boot and print the link status report
    Status,

    /// Firmware diagnostics
    Utc {
        #[command(subcommand)]
        action: UtcAction,
    },

    /// Send a payload and wait for the echo
    IpcTest {
        payload: String,

        /// Number of round trips
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },

    /// Capture a manual crash dump
    Dump {
        /// File to write the raw record to
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Shut down and reset repeatedly
    Cycle {
        #[arg(short = 'n', long, default_value_t = 3)]
        times: u32,

        /// Restart the core only and keep the resident image
        #[arg(long)]
        core: bool,
    },
}

#[derive(Subcommand)]
enum UtcAction {
    /// List diagnostics the firmware knows
    List,
    /// Run one diagnostic by id or name
    Run { which: String },
}

/// Simulator settings, the `[sim]` table of the config file
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
struct SimSection {
    sram_size: usize,
    dump_size: usize,
}

impl Default for SimSection {
    fn default() -> Self {
        let board = SimBoardConfig::default();
        Self {
            sram_size: board.sram_size,
            dump_size: board.dump_size,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CtlFile {
    sim: SimSection,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let (config, sim) = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Boot => {
            let link = boot(config, sim)?;
            print_map(&link);
        }

        Commands::Status => {
            let link = boot(config, sim)?;
            print!("{}", link.status_report());
        }

        Commands::Utc { action: UtcAction::List } => {
            for cmd in UTC_COMMANDS {
                println!("{:>3}  {}", cmd.id, cmd.name);
            }
        }

        Commands::Utc {
            action: UtcAction::Run { which },
        } => {
            let link = boot(config, sim)?;
            run_utc(&link, &which)?;
        }

        Commands::IpcTest { payload, count } => {
            let link = boot(config, sim)?;
            ipc_test(&link, &payload, count)?;
        }

        Commands::Dump { out } => {
            let link = boot(config, sim)?;
            save_dump(&link, &out)?;
        }

        Commands::Cycle { times, core } => {
            let link = boot(config, sim)?;
            cycle(&link, times, core)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp_millis()
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<(ChubConfig, SimBoardConfig)> {
    let Some(path) = path else {
        return Ok((ChubConfig::default(), SimBoardConfig::default()));
    };
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config = ChubConfig::from_toml_str(&text)
        .with_context(|| format!("parsing driver settings in {}", path.display()))?;
    let ctl: CtlFile = toml::from_str(&text)
        .with_context(|| format!("parsing [sim] in {}", path.display()))?;
    Ok((
        config,
        SimBoardConfig {
            sram_size: ctl.sim.sram_size,
            dump_size: ctl.sim.dump_size,
        },
    ))
}

fn boot(config: ChubConfig, sim: SimBoardConfig) -> anyhow::Result<Arc<ChubLink>> {
    println!(
        "{} Booting simulated CHUB ({}KB SRAM)...",
        "🔌".green(),
        sim.sram_size / 1024
    );
    let board = Arc::new(SimBoard::new(sim).context("creating simulated board")?);
    let link = ChubLink::new(board, config, Arc::new(LogRestart))?;
    link.power_on().context("boot failed")?;
    println!("{} CHUB is {}", "✅".green(), link.state().to_string().bold());
    Ok(link)
}

fn print_map(link: &ChubLink) {
    let Some(map) = link.map() else {
        println!("map: unresolved");
        return;
    };
    let regions = [
        ("bootloader", map.bootloader),
        ("os", map.os),
        ("ipc", map.ipc),
        ("ram", map.ram),
        ("shared", map.shared),
        ("dump", map.dump),
    ];
    println!("\n{}", "Memory map".bold());
    for (name, region) in regions {
        println!(
            "  {:<10} {:#08x}..{:#08x}  {:>7} bytes",
            name,
            region.start,
            region.end,
            region.len()
        );
    }
}

fn run_utc(link: &ChubLink, which: &str) -> anyhow::Result<()> {
    let cmd = match which.parse::<u32>() {
        Ok(id) => utc::lookup(id),
        Err(_) => utc::find(which),
    }
    .with_context(|| format!("unknown diagnostic '{}', see `chub-ctl utc list`", which))?;

    link.debug_action(cmd.id)?;
    println!("{} Requested diagnostic {} ({})", "🔧".green(), cmd.name.bold(), cmd.id);

    // Give the firmware a moment to answer and the worker to drain its log
    std::thread::sleep(Duration::from_millis(100));
    for line in link.recent_firmware_log() {
        println!("  fw: {}", line);
    }
    if cmd.id == UTC_CHECK_STATUS {
        let value = link.debug_value();
        println!("  debug value: {:#018x}", value);
    }
    Ok(())
}

fn ipc_test(link: &Arc<ChubLink>, payload: &str, count: u32) -> anyhow::Result<()> {
    let fs = DebugFs::new(link.clone());
    for i in 1..=count {
        fs.store("ipc_test", payload.as_bytes())
            .with_context(|| format!("round trip {} of {}", i, count))?;
    }
    print!("{} {}", "📨".green(), fs.show("ipc_test")?);
    println!("  {} round trip(s) completed", count);
    Ok(())
}

fn save_dump(link: &ChubLink, out: &Path) -> anyhow::Result<()> {
    link.dump(DumpReason::Manual)?;
    let view = link
        .last_dump()?
        .context("dump memory holds no valid record")?;
    fs::write(out, view.as_bytes()).with_context(|| format!("writing {}", out.display()))?;

    println!(
        "{} Dump #{} ({}) saved to {}",
        "💾".green(),
        view.sequence(),
        view.reason().map(|r| r.to_string()).unwrap_or_else(|| "unknown".into()),
        out.display()
    );
    for name in ["gpr", "sram", "driver"] {
        if let Some(area) = view.area(name) {
            println!("  {:<7} {:>7} bytes", name, area.len());
        }
    }
    if let Some(gprs) = view.gprs() {
        println!("  PC {:#010x}", gprs[chub_ipc::gpr::GPR_PC]);
    }
    Ok(())
}

fn cycle(link: &ChubLink, times: u32, core: bool) -> anyhow::Result<()> {
    let kind = if core { "core" } else { "system" };
    for i in 1..=times {
        link.shutdown()
            .with_context(|| format!("shutdown {} of {}", i, times))?;
        link.reset(core)
            .with_context(|| format!("{} reset {} of {}", kind, i, times))?;
        anyhow::ensure!(
            link.state() == LinkState::Run,
            "link is {} after reset {}",
            link.state(),
            i
        );
        println!("{} {} reset {}/{}: {}", "🔁".green(), kind, i, times, link.state());
    }
    Ok(())
}
