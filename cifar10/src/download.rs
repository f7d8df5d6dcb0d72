//! Fetches and unpacks the CIFAR-10 binary archive.

use crate::cifar10::{BATCHES_DIR, Cifar10Error, create_progress_style};
use flate2::read::GzDecoder;
use indicatif::ProgressBar;
use log::info;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const ARCHIVE_URL: &str = "https://www.cs.toronto.edu/~kriz/cifar-10-binary.tar.gz";
pub const ARCHIVE_NAME: &str = "cifar-10-binary.tar.gz";

/// Makes sure the CIFAR-10 batch files exist under `root`, downloading and
/// unpacking the archive if needed.
///
/// Nothing is fetched when `root/cifar-10-batches-bin` already exists, and an
/// archive left over from an earlier run is unpacked without downloading it
/// again. Returns the batches directory.
pub fn download(root: impl AsRef<Path>) -> Result<PathBuf, Cifar10Error> {
    let root = root.as_ref();
    let batches = root.join(BATCHES_DIR);
    if batches.is_dir() {
        info!("Files already downloaded and verified");
        return Ok(batches);
    }

    fs::create_dir_all(root)?;
    let archive = root.join(ARCHIVE_NAME);
    if archive.is_file() {
        info!("Using existing archive {}", archive.display());
    } else {
        fetch(ARCHIVE_URL, &archive)?;
    }

    info!("Extracting {} to {}", archive.display(), root.display());
    extract_tar_gz(&archive, root)?;
    if !batches.is_dir() {
        return Err(Cifar10Error::MissingData(batches));
    }
    Ok(batches)
}

/// Streams `url` into `dest`, via a temporary file so an interrupted
/// download never leaves a truncated archive behind.
fn fetch(url: &str, dest: &Path) -> Result<(), Cifar10Error> {
    info!("Downloading {url} to {}", dest.display());
    let mut response = reqwest::blocking::get(url)?.error_for_status()?;

    let progress = ProgressBar::new(response.content_length().unwrap_or(0));
    progress.set_style(create_progress_style(
        "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} {msg}",
    ));
    progress.set_message("Downloading CIFAR-10");

    let partial = dest.with_extension("part");
    {
        let mut writer = progress.wrap_write(BufWriter::new(File::create(&partial)?));
        io::copy(&mut response, &mut writer)?;
        writer.flush()?;
    }
    fs::rename(&partial, dest)?;
    progress.finish_with_message("Download complete");
    Ok(())
}

/// Unpacks a `.tar.gz` archive into `output_dir`.
pub fn extract_tar_gz(archive: &Path, output_dir: &Path) -> Result<(), Cifar10Error> {
    let decoder = GzDecoder::new(File::open(archive)?);
    tar::Archive::new(decoder).unpack(output_dir)?;
    Ok(())
}
