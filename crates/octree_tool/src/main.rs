//! Volume octree command-line tool.
//!
//! Builds octrees from raw volume files and reads them back:
//! - build: raw channel files + TOML config -> octree directory
//! - info: tree description and histogram summary
//! - slice / volume: raw little-endian u16 reconstructions at any level
//! - voxel: a single full-resolution sample

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use glam::UVec3;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, PoolConfig};
use volume_octree::{
	BrickPoolManager, ChannelProgress, ChannelSource, ComposeBudget, DiskBrickPool, DiskPoolConfig,
	PoolRestore, RamBrickPool, RawVolumeFile, Reconstruction, SliceAlignment, VolumeOctree,
};

const MB: u64 = 1 << 20;

/// Builder and inspector for volume octrees.
#[derive(Parser, Debug)]
#[command(name = "octree")]
#[command(about = "Builds and inspects multi-resolution volume octrees")]
struct Args {
	/// Log construction and I/O phases to stderr.
	#[arg(short, long, global = true)]
	verbose: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Build an octree from raw channel files.
	Build {
		/// Path to configuration TOML file.
		#[arg(short, long)]
		config: PathBuf,
	},
	/// Print tree statistics and histograms.
	Info {
		dir: PathBuf,
		/// RAM limit for a disk pool, in MB.
		#[arg(long)]
		ram_limit_mb: Option<u64>,
	},
	/// Extract an axis-aligned slice.
	Slice {
		dir: PathBuf,
		#[arg(long, value_enum)]
		axis: Axis,
		/// Slice index in full-resolution voxels.
		#[arg(long)]
		index: u32,
		#[arg(long, default_value_t = 0)]
		level: u32,
		/// Use only resident bricks after this many milliseconds.
		#[arg(long)]
		time_limit_ms: Option<u64>,
		#[arg(short, long)]
		output: PathBuf,
	},
	/// Reconstruct the whole volume at a level.
	Volume {
		dir: PathBuf,
		#[arg(long, default_value_t = 0)]
		level: u32,
		#[arg(short, long)]
		output: PathBuf,
	},
	/// Print one full-resolution sample.
	Voxel {
		dir: PathBuf,
		x: u32,
		y: u32,
		z: u32,
		#[arg(long, default_value_t = 0)]
		channel: usize,
	},
}

/// Axis perpendicular to the slice.
#[derive(ValueEnum, Clone, Copy, Debug)]
enum Axis {
	X,
	Y,
	Z,
}

impl From<Axis> for SliceAlignment {
	fn from(axis: Axis) -> Self {
		match axis {
			Axis::X => SliceAlignment::YzPlane,
			Axis::Y => SliceAlignment::XzPlane,
			Axis::Z => SliceAlignment::XyPlane,
		}
	}
}

fn main() -> Result<()> {
	let args = Args::parse();
	if args.verbose {
		tracing_subscriber::fmt()
			.with_env_filter(
				tracing_subscriber::EnvFilter::try_from_default_env()
					.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
			)
			.with_writer(std::io::stderr)
			.init();
	}

	match args.command {
		Command::Build { config } => build(&config),
		Command::Info { dir, ram_limit_mb } => info(&dir, ram_limit_mb),
		Command::Slice {
			dir,
			axis,
			index,
			level,
			time_limit_ms,
			output,
		} => {
			let octree = load(&dir, None)?;
			let budget = time_limit_ms
				.map(|ms| ComposeBudget::with_limit(Duration::from_millis(ms)))
				.unwrap_or(ComposeBudget::UNLIMITED);
			let slice = octree
				.create_slice(axis.into(), index, level, budget)
				.context("Slice extraction failed")?;
			write_reconstruction(&slice, &output)
		}
		Command::Volume { dir, level, output } => {
			let octree = load(&dir, None)?;
			let volume = octree
				.create_volume(level, ComposeBudget::UNLIMITED)
				.context("Volume reconstruction failed")?;
			write_reconstruction(&volume, &output)
		}
		Command::Voxel {
			dir,
			x,
			y,
			z,
			channel,
		} => {
			let octree = load(&dir, None)?;
			let value = octree
				.get_voxel(UVec3::new(x, y, z), channel)
				.context("Voxel query failed")?;
			let normalized = value as f32 / u16::MAX as f32;
			println!("[{x}, {y}, {z}] channel {channel}: {value} (normalized {normalized:.6})");
			Ok(())
		}
	}
}

fn build(config_path: &Path) -> Result<()> {
	println!("Loading config from: {}", config_path.display());
	let config = Config::load(config_path)?;
	let dimensions = UVec3::from_array(config.dimensions);

	let sources = config
		.channels
		.iter()
		.map(|channel| {
			RawVolumeFile::open_with_header(&channel.file, dimensions, config.format, config.header_bytes)
				.map(|source| source.with_real_world_mapping(channel.mapping()))
				.with_context(|| format!("Failed to open channel: {}", channel.file.display()))
		})
		.collect::<Result<Vec<_>>>()?;
	let sources: Vec<&dyn ChannelSource> = sources.iter().map(|s| s as &dyn ChannelSource).collect();

	std::fs::create_dir_all(&config.output_dir)
		.with_context(|| format!("Failed to create output dir: {}", config.output_dir.display()))?;
	let pool: Box<dyn BrickPoolManager> = match config.pool {
		PoolConfig::Ram { buffer_mb } => Box::new(RamBrickPool::new(buffer_mb * MB)),
		PoolConfig::Disk {
			buffer_mb,
			ram_limit_mb,
		} => Box::new(DiskBrickPool::new(
			DiskPoolConfig::new(&config.output_dir)
				.with_max_buffer_bytes(buffer_mb * MB)
				.with_ram_limit_bytes(ram_limit_mb * MB),
		)),
	};

	println!(
		"Building {} channel(s) of {} with brick {}",
		sources.len(),
		dimensions,
		config.octree.brick_dim
	);

	let (mut progress, receiver) = ChannelProgress::channel();
	let reporter = std::thread::spawn(move || {
		let mut last = -1i32;
		for value in receiver {
			let percent = (value * 100.0) as i32;
			if percent != last {
				print!("\r  {percent:3}%");
				let _ = std::io::stdout().flush();
				last = percent;
			}
		}
		println!();
	});

	let result = VolumeOctree::build(&sources, &config.build_options(), pool, &mut progress);
	drop(progress);
	let _ = reporter.join();
	let octree = result.context("Octree construction failed")?;

	octree
		.save(&config.output_dir)
		.with_context(|| format!("Failed to save octree: {}", config.output_dir.display()))?;

	let stats = octree.construction_stats();
	println!(
		"  {} nodes, {} bricks, {} homogeneous leaves in {:.2}s",
		octree.node_count(),
		octree.brick_count(),
		stats.homogeneous_leaves,
		stats.elapsed.as_secs_f64()
	);
	println!("\nDone! Octree written to: {}", config.output_dir.display());
	Ok(())
}

fn info(dir: &Path, ram_limit_mb: Option<u64>) -> Result<()> {
	let octree = load(dir, ram_limit_mb)?;
	println!("{}", octree.description());

	for channel in 0..octree.num_channels() {
		let histogram = octree.histogram(channel)?;
		let (peak, count) = histogram
			.buckets()
			.iter()
			.enumerate()
			.max_by_key(|(_, count)| **count)
			.map(|(bucket, count)| (bucket, *count))
			.unwrap_or((0, 0));
		let (low, high) = histogram.bucket_range(peak);
		println!(
			"Channel {channel}: {} samples in {} buckets, range [{}, {}], peak [{low:.4}, {high:.4}) x {count}",
			histogram.num_samples(),
			histogram.num_buckets(),
			histogram.min_value(),
			histogram.max_value()
		);
	}
	Ok(())
}

fn load(dir: &Path, ram_limit_mb: Option<u64>) -> Result<VolumeOctree> {
	let restore = PoolRestore {
		ram_limit_bytes: ram_limit_mb.map(|mb| mb * MB),
	};
	VolumeOctree::load(dir, &restore)
		.with_context(|| format!("Failed to load octree: {}", dir.display()))
}

/// Write interleaved samples as little-endian u16.
fn write_reconstruction(reconstruction: &Reconstruction, output: &Path) -> Result<()> {
	let file = std::fs::File::create(output)
		.with_context(|| format!("Failed to create: {}", output.display()))?;
	let mut writer = BufWriter::new(file);
	for value in &reconstruction.data {
		writer.write_all(&value.to_le_bytes())?;
	}
	writer
		.flush()
		.with_context(|| format!("Failed to write: {}", output.display()))?;

	println!(
		"Wrote {} x {} channel(s) to {}",
		reconstruction.dimensions,
		reconstruction.num_channels,
		output.display()
	);
	if !reconstruction.complete {
		eprintln!("warning: time limit reached, some bricks were replaced by node averages");
	}
	Ok(())
}
