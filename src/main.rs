#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use std::fs::File;
use std::io::{self, BufRead, Read, Write};
use std::num::ParseIntError;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};

use lab_flash::{display, Options, Programmer};

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// Serial port to connect to
    #[structopt(long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Serial port baud rate
    #[structopt(long, default_value = "115200")]
    baud: usize,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,

    #[structopt(subcommand)]
    command: Operation,
}

#[derive(Clone, Debug, StructOpt)]
pub enum Operation {
    /// Check the board is responding
    Ping,

    /// Show the flash manufacturer and part codes
    Id,

    /// Show the contents of the boot table
    Boot,

    /// Show the allocation of flash according to the boot table
    Rom,

    /// Erase the flash sector containing an address
    Erase {
        /// Address within the sector (hex)
        #[structopt(parse(try_from_str = parse_hex))]
        address: u32,

        /// Erase without checking the memory map or asking for confirmation
        #[structopt(long, short)]
        force: bool,
    },

    /// Read flash to a file, or hex dump to the console if the file is `-`
    Read {
        file: String,

        /// Start address (hex)
        #[structopt(parse(try_from_str = parse_hex))]
        address: u32,

        /// Number of bytes (hex)
        #[structopt(parse(try_from_str = parse_hex))]
        length: u32,
    },

    /// Write a file to flash, padding with 0xFF up to the length
    Write {
        file: String,

        /// Start address (hex)
        #[structopt(parse(try_from_str = parse_hex))]
        address: u32,

        /// Number of bytes (hex)
        #[structopt(parse(try_from_str = parse_hex))]
        length: u32,
    },
}

fn parse_hex(s: &str) -> Result<u32, ParseIntError> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(s, 16)
}

fn progress(length: u64) -> ProgressBar {
    let pb = ProgressBar::new(length);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("Flash [{bar:40}] {bytes}/{total_bytes} ({eta})")
            .progress_chars("=> "),
    );
    pb
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;

    let answer = line.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

type LinuxProgrammer =
    Programmer<linux_embedded_hal::Serial, linux_embedded_hal::Delay, std::io::ErrorKind>;

fn run(p: &mut LinuxProgrammer, op: Operation) -> anyhow::Result<()> {
    match op {
        Operation::Ping => {
            p.ping().context("pinging board")?;
            info!("Board responded to ping");
        }
        Operation::Id => {
            let id = p.identify().context("reading ROM ID")?;
            info!(
                "Manufacturer: 0x{:02x} Part: 0x{:02x}",
                id.manufacturer, id.part
            );
        }
        Operation::Boot => {
            let table = p.boot_table().context("reading boot table")?;
            print!("{}", display::boot_table(&table));
        }
        Operation::Rom => {
            let map = p.memory_map().context("reading boot table")?;
            print!("{}", display::memory_map(&map));
        }
        Operation::Erase { address, force } => {
            if !force {
                info!("Checking memory map...");
                let check = p.check_erase(address)?;
                print!("{}", display::erase_check(&check));

                if !confirm("Are you sure?")? {
                    info!("Cancelled.");
                    return Ok(());
                }
            }

            let sector = lab_flash::memory::sector_containing(address)?;
            info!(
                "Erasing {:06X} - {:06X} ({})...",
                sector.start,
                sector.end - 1,
                bytefmt::format(sector.len() as u64)
            );
            p.erase(address).context("erasing sector")?;
        }
        Operation::Read {
            file,
            address,
            length,
        } => {
            info!(
                "Reading {} from 0x{:06x}",
                bytefmt::format(length as u64),
                address
            );

            if file == "-" {
                for chunk in p.read_chunks(address, length)? {
                    println!("{}", hex::encode(chunk?));
                }
                return Ok(());
            }

            let mut f = File::create(&file).with_context(|| format!("creating {}", file))?;
            let pb = progress(length as u64);

            for chunk in p.read_chunks(address, length)? {
                let chunk = chunk?;
                f.write_all(&chunk)?;
                pb.inc(chunk.len() as u64);
            }

            pb.finish_with_message("done");
        }
        Operation::Write {
            file,
            address,
            length,
        } => {
            let mut data = Vec::with_capacity(length as usize);
            File::open(&file)
                .with_context(|| format!("opening {}", file))?
                .take(length as u64)
                .read_to_end(&mut data)?;
            data.resize(length as usize, 0xFF);

            info!(
                "Writing {} to 0x{:06x}",
                bytefmt::format(length as u64),
                address
            );

            let pb = progress(length as u64);
            for sent in p.write_chunks(address, &data)? {
                pb.inc(sent? as u64);
            }

            pb.finish_with_message("done");
        }
    }

    Ok(())
}

fn main() {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    info!("Connecting to board on {}", o.port);

    let mut p = match Programmer::linux(&o.port, o.baud, o.options) {
        Ok(p) => p,
        Err(e) => {
            error!("Error connecting to board: {:?}", e);
            std::process::exit(1);
        }
    };

    info!("Board connected!");

    if let Err(e) = run(&mut p, o.command) {
        error!("{:?}", e);
        std::process::exit(1);
    }

    p.close();
}
