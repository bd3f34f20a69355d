//! tarzst - write files and directories into a .tar.zst archive

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use std::fs;
use std::path::PathBuf;
use tarzst_archive::{TarZstWriter, WriterOptions, ZstdOptions};

mod cli;
use cli::{Cli, Commands};

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Create {
            output,
            inputs,
            level,
            no_checksum,
            long,
            threads,
            window_log,
            no_verify_sizes,
            no_sync,
        } => {
            println!("tarzst - Creating archive: {}", output.display());
            println!("Input sources: {} items", inputs.len());
            println!();

            let options = WriterOptions {
                compression: ZstdOptions {
                    level,
                    include_checksum: !no_checksum,
                    long_distance_matching: long,
                    threads,
                    window_log,
                    dict: None,
                },
                verify_entry_size: !no_verify_sizes,
                sync_on_close: !no_sync,
                ..WriterOptions::default()
            };

            println!("Settings:");
            println!("  ZSTD level: {}", level);
            println!("  Checksum: {}", !no_checksum);
            println!("  Long-distance matching: {}", long);
            println!("  Verify entry sizes: {}", !no_verify_sizes);
            println!();

            let mut writer = TarZstWriter::create_with_options(&output, options)
                .with_context(|| format!("Failed to create archive {}", output.display()))?;

            let pb = ProgressBar::new(inputs.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .map_err(|e| anyhow!("invalid progress template: {e}"))?
                    .progress_chars("#>-"),
            );

            let appended = append_inputs(&mut writer, &inputs, &pb);
            let entries = writer.entries();
            let content_bytes = writer.content_bytes();

            // Close even when an input failed, so the output file is released.
            let closed = writer
                .close()
                .with_context(|| format!("Failed to close archive {}", output.display()));
            // Only one error can be returned; report the close failure here.
            if let (Err(_), Err(e)) = (&appended, &closed) {
                eprintln!("Error: {e:#}");
            }
            appended?;
            closed?;

            pb.finish_with_message("Complete");

            let compressed = fs::metadata(&output)
                .with_context(|| format!("Failed to stat {}", output.display()))?
                .len();
            let ratio = if content_bytes > 0 {
                (compressed as f64 / content_bytes as f64) * 100.0
            } else {
                0.0
            };

            println!();
            println!("Archive creation complete!");
            println!("  Entries: {}", entries);
            println!("  Content size: {} bytes", content_bytes);
            println!("  Archive size: {} bytes", compressed);
            println!("  Ratio: {:.2}%", ratio);
            println!();
            println!("Output: {}", output.display());

            Ok(())
        }
    }
}

fn append_inputs(writer: &mut TarZstWriter, inputs: &[PathBuf], pb: &ProgressBar) -> Result<()> {
    for input in inputs {
        let name = input
            .file_name()
            .ok_or_else(|| anyhow!("Input {} has no file name", input.display()))?;
        pb.set_message(name.to_string_lossy().into_owned());

        let meta = fs::symlink_metadata(input).with_context(|| format!("Failed to stat {}", input.display()))?;
        if meta.is_dir() {
            let count = writer
                .append_dir_all(name, input)
                .with_context(|| format!("Failed to append directory {}", input.display()))?;
            debug!("{}: {} entries", input.display(), count);
        } else {
            writer
                .append_file(name, input)
                .with_context(|| format!("Failed to append {}", input.display()))?;
        }
        pb.inc(1);
    }
    Ok(())
}
