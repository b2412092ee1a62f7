use std::fs;
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Result};
use clap::Parser;

use awimage::imagewty::Image;
use awimage::packer::{self, OutputFormat};
use awimage::partition::PartitionTable;

const EXAMPLES: &str = "Examples:
  awimage pack -i ./firmware_dir -o firmware.img
  awimage decrypt -i encrypted.img -o decrypted.img
  awimage unpack -i firmware.img -o ./extracted_files --format imgrepacker
  awimage partition -i firmware.img
  awimage partition -i firmware.img -o partition_table.txt";

#[derive(Parser, Debug)]
#[command(
    name = "awimage",
    version,
    about = "Allwinner IMAGEWTY firmware image tool",
    after_help = EXAMPLES
)]
struct Args {
    /// Operation: pack, decrypt, unpack or partition (case-insensitive)
    operation: String,

    /// Input file or directory
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Output file or directory
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Show detailed information
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Disable encryption (pack operation only)
    #[arg(long = "no-encrypt")]
    no_encrypt: bool,

    /// Output format for unpack operation (unimg or imgrepacker)
    #[arg(long = "format", default_value = "unimg")]
    format: String,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let operation = args.operation.to_lowercase();

    let format = match OutputFormat::parse(&args.format) {
        Some(f) => f,
        None => {
            eprintln!(
                "Warning: Unknown output format: {}, using default (unimg)",
                args.format
            );
            OutputFormat::Unimg
        }
    };

    if args.verbose {
        println!("awimage v{} started", env!("CARGO_PKG_VERSION"));
        println!("Operation: {operation}");
        println!("Input: {}", args.input.display());
        if let Some(output) = &args.output {
            println!("Output: {}", output.display());
        }
    }

    match operation.as_str() {
        "pack" => {
            let Some(output) = &args.output else {
                bail!("pack requires -o <output>");
            };
            if args.verbose && args.no_encrypt {
                println!("Encryption: disabled");
            }
            packer::pack_image(&args.input, output, !args.no_encrypt)?;
        }
        "decrypt" => {
            let Some(output) = &args.output else {
                bail!("decrypt requires -o <output>");
            };
            let image = Image::load_verbose(&args.input, args.verbose)?;
            image.write_decrypted(output, args.verbose)?;
        }
        "unpack" => {
            let Some(output) = &args.output else {
                bail!("unpack requires -o <output>");
            };
            if args.verbose {
                println!("Output format: {}", format.name());
            }
            let image = Image::load_verbose(&args.input, args.verbose)?;
            packer::unpack_image(&image, output, format, args.verbose)?;
        }
        "partition" => {
            println!("Reading sys_partition.fex from image...");
            let image = Image::load_verbose(&args.input, args.verbose)?;
            let Some(entry) = image.file_by_filename("sys_partition.fex") else {
                bail!("failed to find sys_partition.fex in the image");
            };

            println!("Found sys_partition.fex. Parsing partition table...");
            let table = PartitionTable::parse_bytes(&image.data(entry));
            let dump = table.dump_to_string();
            match &args.output {
                Some(output) => {
                    fs::write(output, &dump)?;
                    println!(
                        "Partition table information has been written to {}",
                        output.display()
                    );
                }
                None => print!("{dump}"),
            }
        }
        other => bail!("unknown operation: {other} (expected pack, decrypt, unpack or partition)"),
    }

    Ok(())
}
