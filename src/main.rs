use clap::{Parser, Subcommand};
use romfs::inspect::{manifest, ImageReport};
use romfs::logging::init_logging;
use romfs::packer::{DirectoryPacker, PackOptions};
use romfs::reader::RomFs;
use romfs::tree::Directory;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "romfs", about = "Pack directory trees into read-only ROM filesystem images")]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace); ROMFS_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack a directory into an image file
    Pack {
        /// Source directory
        src: PathBuf,
        /// Destination image; replaced only on success
        dst: PathBuf,
        /// Encode entries in name order for reproducible images
        #[arg(short, long)]
        sorted: bool,
    },
    /// Extract an image into a directory
    Unpack {
        input: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// List image contents
    List {
        input: PathBuf,
        /// Emit the manifest as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show image statistics
    Info {
        input: PathBuf,
        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write one file from the image to stdout
    Cat {
        input: PathBuf,
        path: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { src, dst, sorted } => {
            let packer = DirectoryPacker::with_options(PackOptions { sort_entries: sorted });
            let size = packer.pack_to_file(&src, &dst)?;
            println!("Created: {} ({} bytes)", dst.display(), size);
        }

        // ── Unpack ───────────────────────────────────────────────────────────
        Commands::Unpack { input, output_dir } => {
            let image = std::fs::read(&input)?;
            Directory::decode(&image)?.extract_to(&output_dir)?;
            println!("Unpacked to: {}", output_dir.display());
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input, json } => {
            let image = std::fs::read(&input)?;
            let rows = manifest(&image)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                println!("Image: {}", input.display());
                println!("{:<5} {:>10}  Path", "Kind", "Size");
                for row in &rows {
                    println!("{:<5} {:>10}  {}", row.kind.name(), row.size, row.path);
                }
            }
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input, json } => {
            let image  = std::fs::read(&input)?;
            let report = ImageReport::from_image(&image)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }

            println!("── romfs image ──────────────────────────────────────────");
            println!("  Path           {}", input.display());
            println!("  Size           {} B", report.image_size);
            println!("  Files          {}", report.files);
            println!("  Directories    {}", report.directories);
            println!("  File bytes     {} B", report.file_bytes);
            println!("  Metadata       {} B", report.metadata_bytes());
            println!("  Padding        {} B", report.padding_bytes);
            println!("  Max depth      {}", report.max_depth);
            println!("  Longest name   {} B", report.longest_name);
            println!("  BLAKE3         {}", report.digest);
        }

        // ── Cat ──────────────────────────────────────────────────────────────
        Commands::Cat { input, path } => {
            let image = std::fs::read(&input)?;
            let file  = RomFs::new(&image).open(&path)
                .map_err(|e| format!("{path}: {e}"))?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(file.as_bytes())?;
            stdout.flush()?;
        }
    }

    Ok(())
}
