use clap::{Parser, Subcommand};
use nbtcask::chunk::{bits_per_index, extract_palette_index};
use nbtcask::codec::Compression;
use nbtcask::index::slot_coords;
use nbtcask::io_stream::{self, ByteOrder, NbtOptions, NbtReader};
use nbtcask::recovery;
use nbtcask::region::RegionFile;
use nbtcask::tag::Tag;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nbtcask", version, about = "Inspect tag files and region containers")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every root tag in a tag file
    Dump {
        input: PathBuf,
        /// Compression: gzip (default), zlib, none
        #[arg(short, long, default_value = "gzip")]
        compression: String,
        /// Byte order: big (default), little
        #[arg(short, long, default_value = "big")]
        byte_order: String,
        /// Print as JSON instead of the tree view
        #[arg(long)]
        json: bool,
        /// Maximum nesting depth accepted
        #[arg(long, default_value_t = io_stream::DEFAULT_MAX_DEPTH)]
        max_depth: usize,
    },
    /// Region container commands
    Regions {
        #[command(subcommand)]
        command: RegionCommands,
    },
}

#[derive(Subcommand)]
enum RegionCommands {
    /// List occupied slots in on-disk order
    List {
        input: PathBuf,
    },
    /// Show header statistics
    Info {
        input: PathBuf,
    },
    /// Check every chunk for layout and header damage
    Check {
        input: PathBuf,
        /// Also decode each chunk's tree
        #[arg(short, long)]
        deep: bool,
    },
    /// Print the tree stored at local chunk coordinates
    Extract {
        input: PathBuf,
        x: i32,
        z: i32,
        #[arg(long)]
        json: bool,
        /// Print the decompressed tag stream as hex instead of the tree
        #[arg(long, conflicts_with = "json")]
        raw: bool,
        /// Also write the tree as a gzip tag file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print one palette index from a packed long array
    Palette {
        input: PathBuf,
        x: i32,
        z: i32,
        /// Path of compound names down to the long array, e.g. Level/Sections/0/BlockStates
        path: String,
        /// Index in the 16x16x16 volume, x | z << 4 | y << 8
        index: usize,
        /// Bits per index (derived from the array length when omitted)
        #[arg(long)]
        bits: Option<usize>,
    },
    /// Copy every healthy chunk into a new region file
    Salvage {
        input: PathBuf,
        output: PathBuf,
        #[arg(short, long)]
        deep: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match cli.command {

        // ── Dump ─────────────────────────────────────────────────────────────
        Commands::Dump { input, compression, byte_order, json, max_depth } => {
            let options = NbtOptions::new(parse_compression(&compression)?)
                .with_byte_order(parse_byte_order(&byte_order)?)
                .with_max_depth(max_depth);
            let mut reader = NbtReader::new(BufReader::new(File::open(&input)?), options);
            while let Some(tag) = reader.read_next()? {
                print_tag(&tag, json)?;
            }
        }

        // ── Regions ──────────────────────────────────────────────────────────
        Commands::Regions { command } => match command {
            RegionCommands::List { input } => {
                let region = RegionFile::open(&input)?;
                println!("Region: {}", input.display());
                println!("{:>5} {:>4} {:>4} {:>8} {:>6}  Modified", "Slot", "X", "Z", "Offset", "Count");
                for slot in region.list_occupied_slots() {
                    let Some(entry) = region.entry(slot) else { continue };
                    let (x, z) = slot_coords(slot);
                    println!(
                        "{:>5} {:>4} {:>4} {:>8} {:>6}  {}",
                        slot, x, z, entry.sector_offset, entry.sector_count, format_time(entry.timestamp)
                    );
                }
            }

            RegionCommands::Info { input } => {
                let region = RegionFile::open(&input)?;
                let len = region.file_len()?;
                let used: usize = region
                    .list_occupied_slots()
                    .iter()
                    .filter_map(|s| region.entry(*s))
                    .map(|e| e.sector_count as usize)
                    .sum();
                let newest = region.index().occupied().map(|(_, e)| e.timestamp).max();

                println!("── Region ───────────────────────────────────────────────");
                println!("  Path           {}", input.display());
                println!("  Size           {} B ({} sectors)", len, len.div_ceil(4096));
                println!("  Chunks         {}", region.chunk_count());
                println!("  Data sectors   {}", used);
                println!("  Last modified  {}", newest.map(format_time).unwrap_or_else(|| "-".into()));
            }

            RegionCommands::Check { input, deep } => {
                let mut region = RegionFile::open(&input)?;
                let report = recovery::scan(&mut region, deep, None)?;
                for bad in report.damaged() {
                    let (x, z) = slot_coords(bad.slot);
                    println!("  slot {:>4} ({:>2},{:>2})  {:?}", bad.slot, x, z, bad.health);
                }
                println!("{}", report.summary());
                if !report.is_clean() {
                    std::process::exit(1);
                }
            }

            RegionCommands::Extract { input, x, z, json, raw, output } => {
                let mut region = RegionFile::open(&input)?;
                let slot = RegionFile::slot(x, z)?;
                let Some(blob) = region.load_chunk(slot)? else {
                    println!("No chunk at ({x}, {z})");
                    return Ok(());
                };
                if raw {
                    println!("{}", hex::encode(blob.decompressed()?));
                }
                if !raw || output.is_some() {
                    let tag = blob.read_tag()?;
                    if !raw {
                        print_tag(&tag, json)?;
                    }
                    if let Some(out) = output {
                        io_stream::write_file(&out, &tag, NbtOptions::gzip())?;
                        eprintln!("Wrote {}", out.display());
                    }
                }
            }

            RegionCommands::Palette { input, x, z, path, index, bits } => {
                let mut region = RegionFile::open(&input)?;
                let slot = RegionFile::slot(x, z)?;
                let tag = region.load_tag(slot)?.ok_or_else(|| format!("No chunk at ({x}, {z})"))?;
                let longs = find_long_array(&tag, &path).ok_or_else(|| format!("No long array at {path}"))?;
                let words: Vec<u64> = longs.iter().map(|w| *w as u64).collect();
                let bits = bits.unwrap_or_else(|| bits_per_index(&words));
                println!("{}", extract_palette_index(&words, index, bits));
            }

            RegionCommands::Salvage { input, output, deep } => {
                let mut src = RegionFile::open(&input)?;
                let mut dst = RegionFile::create(&output)?;
                let report = recovery::extract_recoverable(&mut src, &mut dst, deep)?;
                println!("{}", report.summary());
                println!("Salvaged {} chunk(s) → {}", dst.chunk_count(), output.display());
            }
        },
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn parse_compression(s: &str) -> Result<Compression, String> {
    Compression::from_name(s).ok_or_else(|| format!("Unknown compression '{s}'"))
}

fn parse_byte_order(s: &str) -> Result<ByteOrder, String> {
    ByteOrder::from_name(s).ok_or_else(|| format!("Unknown byte order '{s}'"))
}

fn print_tag(tag: &Tag, json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(tag)?);
    } else {
        println!("{tag}");
    }
    Ok(())
}

fn format_time(ts: u32) -> String {
    chrono::DateTime::from_timestamp(ts as i64, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Walk `/`-separated compound names and list indices.
fn find_long_array<'a>(tag: &'a Tag, path: &str) -> Option<&'a [i64]> {
    let mut value = tag.value();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        value = match part.parse::<usize>() {
            Ok(i) if value.as_list().is_some() => value.as_list()?.get(i)?,
            _ => value.as_compound()?.get_value(part)?,
        };
    }
    value.as_long_array()
}
