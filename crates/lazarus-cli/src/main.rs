use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use lazarus_core::export::{default_export_name, export_full, export_preview, ExportOptions};
use lazarus_core::fs::{detect_filesystem, get_filesystem_info, is_raw_image_path};
use lazarus_core::recovery::looks_like_text;
use lazarus_core::{
	scan_image_with, ExFatNode, RecoveryCandidate, RecoveryScanner, ScanConfig, ScanSession,
};
use tracing_subscriber::EnvFilter;

/// Bytes shown by `preview` for binary content
const HEX_PREVIEW_BYTES: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "lazarus", version, about = "Lazarus - find deleted and recent user files in disk images")]
struct Cli {
	/// Log at debug level
	#[arg(short, long, global = true)]
	verbose: bool,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Args, Debug)]
struct ScanArgs {
	/// Path to a raw image file (.img or .dd)
	image: PathBuf,
	/// Accept image files with other extensions
	#[arg(long)]
	force: bool,
	/// JSON file with scan settings; flags below override it
	#[arg(long)]
	config: Option<PathBuf>,
	/// Maximum directory depth below the root
	#[arg(long)]
	max_depth: Option<usize>,
	/// Files created or modified within this many days count as recent
	#[arg(long)]
	recent_days: Option<i64>,
	/// Preview bytes kept per candidate (at most 1 MiB)
	#[arg(long)]
	preview_limit: Option<usize>,
	/// Comma-separated extension allow-list, e.g. pdf,docx,jpg
	#[arg(long, value_delimiter = ',')]
	extensions: Option<Vec<String>>,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Scan an image for deleted and recently touched user files
	Scan {
		#[command(flatten)]
		scan: ScanArgs,
		/// Write a JSON report to this path
		#[arg(long)]
		json: Option<PathBuf>,
		/// Show detailed filesystem information
		#[arg(long)]
		info: bool,
	},
	/// Detect filesystem type
	Detect {
		/// Path to image file
		image: PathBuf,
	},
	/// Print the preview of one candidate
	Preview {
		#[command(flatten)]
		scan: ScanArgs,
		/// Candidate number as listed by `scan`
		#[arg(long)]
		index: usize,
	},
	/// Write one candidate to a file
	Export {
		#[command(flatten)]
		scan: ScanArgs,
		/// Candidate number as listed by `scan`
		#[arg(long)]
		index: usize,
		/// Destination file, or a directory to place it in
		#[arg(long)]
		out: PathBuf,
		/// Re-read the whole file instead of writing the preview
		#[arg(long)]
		full: bool,
		/// Replace an existing destination file
		#[arg(long)]
		overwrite: bool,
	},
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	let default_level = if cli.verbose { "debug" } else { "info" };
	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
		)
		.init();

	match cli.command {
		Commands::Scan { scan, json, info } => {
			if info {
				let info_str = get_filesystem_info(&scan.image)
					.with_context(|| format!("Failed to read filesystem info from {}", scan.image.display()))?;
				println!("📋 File System Information:");
				println!("{}", info_str);
				println!();
			}

			let session = run_scan(&scan)?;
			print_summary(&session);
			print_candidates(&session);

			if let Some(json_path) = json {
				session
					.report()
					.save_json(&json_path)
					.with_context(|| format!("Failed to save report to {}", json_path.display()))?;
				println!("💾 Report written to {}", json_path.display());
			}
		}
		Commands::Detect { image } => {
			println!("🔍 Detecting file system type for: {}", image.display());

			match detect_filesystem(&image)? {
				Some(fs_type) => {
					println!("✅ Detected: {}", fs_type);

					if let Ok(info) = get_filesystem_info(&image) {
						println!();
						println!("{}", info);
					}
				}
				None => {
					println!("❌ Unknown or unsupported file system");
				}
			}
		}
		Commands::Preview { scan, index } => {
			let session = run_scan(&scan)?;
			let candidate = select(&session, index)?;

			println!("📄 {} ({} bytes, {})", candidate.path, candidate.size, state_label(candidate));
			println!("🕒 {}", candidate.recovery_timestamp());
			println!("🏷️  {}", candidate.mime_type());
			println!();

			if !candidate.preview_available {
				println!("⚠️  Content could not be read");
			} else if looks_like_text(&candidate.preview) {
				println!("{}", candidate.preview_text());
			} else {
				print_hex(&candidate.preview[..candidate.preview.len().min(HEX_PREVIEW_BYTES)]);
			}

			if (candidate.preview.len() as u64) < candidate.size {
				println!();
				println!("… showing {} of {} bytes", candidate.preview.len(), candidate.size);
			}
		}
		Commands::Export { scan, index, out, full, overwrite } => {
			let session = run_scan(&scan)?;
			let candidate = select(&session, index)?;

			let dest = if out.is_dir() {
				out.join(default_export_name(candidate, index))
			} else {
				out
			};
			let options = ExportOptions { overwrite };

			let report = if full {
				export_full(&session.image, candidate, &dest, options)
			} else {
				export_preview(candidate, &dest, options)
			}
			.with_context(|| format!("Failed to export {}", candidate.path))?;

			println!("✅ Exported {} to {}", candidate.path, report.path.display());
			println!("📦 Bytes written: {}", report.bytes_written);
			println!("🔐 SHA-256: {}", report.sha256);
			if !report.complete {
				println!("⚠️  Output is shorter than the recorded size ({} bytes)", candidate.size);
			}
		}
	}
	Ok(())
}

fn build_config(args: &ScanArgs) -> Result<ScanConfig> {
	let mut config = match &args.config {
		Some(path) => ScanConfig::from_json_file(path)?,
		None => ScanConfig::default(),
	};

	if let Some(depth) = args.max_depth {
		config.max_depth = depth;
	}
	if let Some(days) = args.recent_days {
		config.recent_window_days = days;
	}
	if let Some(limit) = args.preview_limit {
		config.preview_limit = limit;
	}
	if let Some(extensions) = &args.extensions {
		config.extensions = extensions.clone();
	}

	config.validate()?;
	Ok(config.normalized())
}

fn check_image_path(image: &Path, force: bool) -> Result<()> {
	if !force && !is_raw_image_path(image) {
		bail!(
			"{} is not a .img or .dd file (use --force to scan it anyway)",
			image.display()
		);
	}
	Ok(())
}

fn run_scan(args: &ScanArgs) -> Result<ScanSession> {
	check_image_path(&args.image, args.force)?;
	let config = build_config(args)?;

	let spinner = ProgressBar::new_spinner();
	spinner.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
	spinner.set_message(format!("Scanning {}", args.image.display()));
	spinner.enable_steady_tick(Duration::from_millis(100));

	let mut scanner = RecoveryScanner::new(config);
	let progress = spinner.clone();
	scanner.set_progress_callback(move |p| {
		progress.set_message(format!(
			"{} directories, {} candidates - {}",
			p.directories_visited, p.candidates_found, p.current_path
		));
	});

	let result = scan_image_with(&args.image, scanner);
	spinner.finish_and_clear();

	result.with_context(|| format!("Failed to scan {}", args.image.display()))
}

fn select(session: &ScanSession, index: usize) -> Result<&RecoveryCandidate<ExFatNode>> {
	let candidates = session.candidates();
	index
		.checked_sub(1)
		.and_then(|i| candidates.get(i))
		.with_context(|| format!("No candidate #{} (scan found {})", index, candidates.len()))
}

fn state_label(candidate: &RecoveryCandidate<ExFatNode>) -> &'static str {
	if candidate.is_deleted() {
		"deleted"
	} else {
		"recent"
	}
}

fn print_summary(session: &ScanSession) {
	let stats = &session.outcome.stats;
	println!("✅ Scan completed successfully!");
	println!("📊 Session ID: {}", session.id);
	println!("📁 File System: {}", session.fs_type);
	println!("💾 Image Size: {} MB", session.image.image_size() / (1024 * 1024));
	println!("📂 Directories Visited: {}", stats.directories_visited);
	println!("🔎 Entries Examined: {}", stats.entries_examined);
	println!("📈 Candidates: {} ({} deleted)", stats.candidates, stats.deleted_candidates);

	let warnings = session.warnings();
	if !warnings.is_empty() {
		println!("⚠️  Warnings: {}", warnings.len());
		for warning in warnings {
			println!("   {:?} {}: {}", warning.kind, warning.path, warning.message);
		}
	}
	println!();
}

fn print_candidates(session: &ScanSession) {
	let candidates = session.candidates();
	if candidates.is_empty() {
		println!("No files recovered.");
		return;
	}

	println!("{:>4}  {:<8} {:>12}  {:<19}  {}", "#", "STATE", "SIZE", "TIMESTAMP", "PATH");
	for (i, candidate) in candidates.iter().enumerate() {
		println!(
			"{:>4}  {:<8} {:>12}  {:<19}  {}",
			i + 1,
			state_label(candidate),
			candidate.size,
			candidate.recovery_timestamp(),
			candidate.path
		);
	}
}

fn print_hex(data: &[u8]) {
	for (row, chunk) in data.chunks(16).enumerate() {
		let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
		let ascii: String = chunk
			.iter()
			.map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
			.collect();
		println!("{:08x}  {:<47}  {}", row * 16, hex.join(" "), ascii);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn args(image: &str) -> ScanArgs {
		ScanArgs {
			image: PathBuf::from(image),
			force: false,
			config: None,
			max_depth: None,
			recent_days: None,
			preview_limit: None,
			extensions: None,
		}
	}

	#[test]
	fn test_image_extension_check() {
		assert!(check_image_path(Path::new("usb.img"), false).is_ok());
		assert!(check_image_path(Path::new("card.DD"), false).is_ok());
		assert!(check_image_path(Path::new("disk.vhd"), false).is_err());
		assert!(check_image_path(Path::new("disk.vhd"), true).is_ok());
	}

	#[test]
	fn test_flags_override_defaults() {
		let mut scan = args("usb.img");
		scan.max_depth = Some(3);
		scan.recent_days = Some(1);
		scan.preview_limit = Some(8 * 1024 * 1024);
		scan.extensions = Some(vec!["PDF".to_string(), "dat".to_string()]);

		let config = build_config(&scan).unwrap();
		assert_eq!(config.max_depth, 3);
		assert_eq!(config.recent_window_days, 1);
		assert_eq!(config.preview_limit, 1024 * 1024);
		assert_eq!(config.extensions, vec![".pdf", ".dat"]);
	}

	#[test]
	fn test_negative_window_rejected() {
		let mut scan = args("usb.img");
		scan.recent_days = Some(-2);
		assert!(build_config(&scan).is_err());
	}

	#[test]
	fn test_oversized_window_rejected() {
		let mut scan = args("usb.img");
		scan.recent_days = Some(9_999_999_999_999_999);
		assert!(build_config(&scan).is_err());
	}

	#[test]
	fn test_cli_parses_export() {
		let cli = Cli::try_parse_from([
			"lazarus", "export", "usb.img", "--index", "2", "--out", "/tmp/x", "--full",
		])
		.unwrap();
		match cli.command {
			Commands::Export { scan, index, full, overwrite, .. } => {
				assert_eq!(scan.image, PathBuf::from("usb.img"));
				assert_eq!(index, 2);
				assert!(full);
				assert!(!overwrite);
			}
			other => panic!("unexpected command {:?}", other),
		}
	}
}
