//! Configuration parsing for octree construction.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use volume_octree::{BuildOptions, RealWorldMapping, VoxelFormat};

/// Root configuration of `octree build`.
#[derive(Debug, Deserialize)]
pub struct Config {
	/// Octree directory to write.
	pub output_dir: PathBuf,
	/// Volume dimensions shared by all channels.
	pub dimensions: [u32; 3],
	/// Voxel format shared by all channels.
	pub format: VoxelFormat,
	/// Bytes to skip at the start of every channel file.
	#[serde(default)]
	pub header_bytes: u64,
	/// Channel definitions, 1 to 4.
	pub channels: Vec<ChannelConfig>,
	#[serde(default)]
	pub octree: OctreeConfig,
	#[serde(default)]
	pub pool: PoolConfig,
}

/// One raw channel file.
#[derive(Debug, Deserialize)]
pub struct ChannelConfig {
	/// Path to the raw file, relative to the config file.
	pub file: PathBuf,
	/// Real-world scale applied to normalized values.
	#[serde(default = "default_scale")]
	pub scale: f32,
	/// Real-world offset applied after scaling.
	#[serde(default)]
	pub offset: f32,
}

/// Construction parameters.
#[derive(Debug, Deserialize)]
pub struct OctreeConfig {
	/// Brick edge length (power of two).
	#[serde(default = "default_brick_dim")]
	pub brick_dim: u32,
	/// Homogeneity threshold in [0, 1]; negative disables pruning.
	#[serde(default = "default_threshold")]
	pub threshold: f32,
	/// Worker threads (0 = one per core).
	#[serde(default)]
	pub threads: usize,
}

/// Brick pool selection.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PoolConfig {
	/// All bricks in memory.
	Ram {
		#[serde(default = "default_buffer_mb")]
		buffer_mb: u64,
	},
	/// Bricks paged to buffer files in the output directory.
	Disk {
		#[serde(default = "default_buffer_mb")]
		buffer_mb: u64,
		#[serde(default = "default_ram_limit_mb")]
		ram_limit_mb: u64,
	},
}

fn default_scale() -> f32 {
	1.0
}

fn default_brick_dim() -> u32 {
	32
}

fn default_threshold() -> f32 {
	0.001
}

fn default_buffer_mb() -> u64 {
	64
}

fn default_ram_limit_mb() -> u64 {
	1024
}

impl Default for OctreeConfig {
	fn default() -> Self {
		Self {
			brick_dim: default_brick_dim(),
			threshold: default_threshold(),
			threads: 0,
		}
	}
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self::Ram {
			buffer_mb: default_buffer_mb(),
		}
	}
}

impl Config {
	/// Load configuration from a TOML file. Relative channel paths and the
	/// output directory are resolved against the config file's directory.
	pub fn load(path: &Path) -> Result<Self> {
		let content = std::fs::read_to_string(path)
			.with_context(|| format!("Failed to read config file: {}", path.display()))?;
		let mut config: Config =
			toml::from_str(&content).with_context(|| "Failed to parse config TOML")?;

		if config.channels.is_empty() {
			anyhow::bail!("Config must have at least one channel");
		}
		if config.channels.len() > 4 {
			anyhow::bail!("Maximum 4 channels supported, found {}", config.channels.len());
		}
		if config.dimensions.contains(&0) {
			anyhow::bail!("dimensions must be non-zero, got {:?}", config.dimensions);
		}
		let brick_dim = config.octree.brick_dim;
		if brick_dim < 2 || !brick_dim.is_power_of_two() {
			anyhow::bail!("brick_dim must be a power of 2, got {brick_dim}");
		}
		if config.octree.threshold > 1.0 {
			anyhow::bail!(
				"threshold must not exceed 1.0, got {}",
				config.octree.threshold
			);
		}
		match config.pool {
			PoolConfig::Ram { buffer_mb } | PoolConfig::Disk { buffer_mb, .. } if buffer_mb == 0 => {
				anyhow::bail!("buffer_mb must be positive");
			}
			PoolConfig::Disk {
				buffer_mb,
				ram_limit_mb,
			} if ram_limit_mb < 2 * buffer_mb => {
				anyhow::bail!(
					"ram_limit_mb must hold two buffers ({} MB), got {ram_limit_mb}",
					2 * buffer_mb
				);
			}
			_ => {}
		}

		let base = path.parent().unwrap_or(Path::new("."));
		for channel in &mut config.channels {
			channel.file = base.join(&channel.file);
		}
		config.output_dir = base.join(&config.output_dir);
		Ok(config)
	}

	pub fn build_options(&self) -> BuildOptions {
		BuildOptions::DEFAULT
			.with_brick_dim(self.octree.brick_dim)
			.with_homogeneity_threshold(self.octree.threshold)
			.with_num_threads(self.octree.threads)
	}
}

impl ChannelConfig {
	pub fn mapping(&self) -> RealWorldMapping {
		RealWorldMapping::new(self.scale, self.offset)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn write_config(name: &str, content: &str) -> PathBuf {
		let dir = std::env::temp_dir().join(format!("octree-tool-{name}-{}", std::process::id()));
		std::fs::create_dir_all(&dir).unwrap();
		let path = dir.join("octree.toml");
		std::fs::write(&path, content).unwrap();
		path
	}

	#[test]
	fn test_defaults_fill_missing_sections() {
		let path = write_config(
			"defaults",
			r#"
output_dir = "out"
dimensions = [64, 32, 16]
format = "uint16"

[[channels]]
file = "density.raw"
"#,
		);
		let config = Config::load(&path).unwrap();
		assert_eq!(config.octree.brick_dim, 32);
		assert_eq!(config.octree.threads, 0);
		assert!(matches!(config.pool, PoolConfig::Ram { buffer_mb: 64 }));
		assert_eq!(config.channels[0].mapping(), RealWorldMapping::IDENTITY);
		assert_eq!(config.output_dir, path.parent().unwrap().join("out"));
		assert_eq!(config.channels[0].file, path.parent().unwrap().join("density.raw"));
	}

	#[test]
	fn test_disk_pool_section() {
		let path = write_config(
			"disk",
			r#"
output_dir = "out"
dimensions = [64, 64, 64]
format = "float"
header_bytes = 128

[[channels]]
file = "a.raw"
scale = 2.0
offset = -1.0

[octree]
brick_dim = 16
threshold = 0.0

[pool]
kind = "disk"
buffer_mb = 8
ram_limit_mb = 32
"#,
		);
		let config = Config::load(&path).unwrap();
		assert_eq!(config.header_bytes, 128);
		assert_eq!(config.format, VoxelFormat::F32);
		assert!(matches!(
			config.pool,
			PoolConfig::Disk {
				buffer_mb: 8,
				ram_limit_mb: 32
			}
		));
		let options = config.build_options();
		assert_eq!(options.brick_dim, 16);
		assert_eq!(options.homogeneity_threshold, 0.0);
	}

	#[test]
	fn test_invalid_configs_are_rejected() {
		let base = r#"
output_dir = "out"
dimensions = [64, 64, 64]
format = "uint8"
"#;
		let cases = [
			("no-channels", format!("{base}channels = []\n")),
			(
				"brick",
				format!("{base}[[channels]]\nfile = \"a.raw\"\n[octree]\nbrick_dim = 12\n"),
			),
			(
				"ram-limit",
				format!(
					"{base}[[channels]]\nfile = \"a.raw\"\n[pool]\nkind = \"disk\"\nbuffer_mb = 16\nram_limit_mb = 16\n"
				),
			),
		];
		for (name, content) in cases {
			let path = write_config(name, &content);
			assert!(Config::load(&path).is_err(), "{name} should be rejected");
		}
	}
}
