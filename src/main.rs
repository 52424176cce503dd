#![warn(clippy::pedantic, elided_lifetimes_in_paths, explicit_outlives_requirements)]
#![allow(non_snake_case)]

use {
	anyhow::Context,
	clap::Parser,
	log::{info, warn, LevelFilter},
	maparea_png::{convert, DEFAULT_DUMP_PATH},
	std::{env, io, path::PathBuf},
};

fn main() -> anyhow::Result<()> {
	/// Draws the area map of a map area texture dump as an indexed PNG beside it.
	#[derive(Parser)]
	#[clap(version)]
	struct Args {
		/// JSON array written by the map area dumper
		#[clap(value_parser, default_value = DEFAULT_DUMP_PATH)]
		dumpPath: PathBuf,
	}
	let mut logger = pretty_env_logger::formatted_builder();
	logger.filter_level(LevelFilter::Info);
	if let Ok(filters) = env::var("RUST_LOG") {
		logger.parse_filters(&filters);
	}
	logger.init();

	let Args { dumpPath } = Args::parse();
	info!("reading {}", dumpPath.display());
	let stdout = &mut io::stdout().lock();
	if convert(&dumpPath, stdout).with_context(|| format!("converting {}", dumpPath.display()))?.is_none() {
		warn!("{} has no map area texture, nothing written", dumpPath.display());
	}
	Ok(())
}
