use anyhow::{Context, Result};
use spectrometer_core::Fid1d;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Every `.fid` file below `dir`, sorted by path.
fn find_fids(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        let is_fid = entry
            .path()
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("fid"));
        if entry.file_type().is_file() && is_fid {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// List the FIDs below `dir` with their metadata.
pub fn run_inspect(dir: &Path, json: bool) -> Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("Not a directory: {}", dir.display());
    }
    let files = find_fids(dir)?;
    log::debug!("Found {} FID files below {}", files.len(), dir.display());

    let mut unreadable = 0;
    for path in &files {
        let fid = match Fid1d::from_file(path) {
            Ok(fid) => fid,
            Err(err) => {
                log::warn!("Skipping {}: {err}", path.display());
                unreadable += 1;
                continue;
            }
        };
        let relative = path.strip_prefix(dir).unwrap_or(path.as_path());

        if json {
            let line = serde_json::json!({
                "path": relative,
                "points": fid.size(),
                "metadata": fid.metadata(),
            });
            println!("{line}");
        } else {
            println!("{}", relative.display());
            println!(
                "  {} | {} | {} points | {} Hz | {}",
                fid.timestamp().format("%Y-%m-%d %H:%M:%S"),
                fid.sample(),
                fid.size(),
                fid.spectral_width(),
                fid.pulse()
            );
        }
    }

    if !json {
        println!("\n✓ {} FIDs in {}", files.len() - unreadable, dir.display());
        if unreadable > 0 {
            println!("  {unreadable} files could not be read");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_find_fids_recurses_and_filters() {
        let temp_dir = TempDir::new().unwrap();
        let series = temp_dir.path().join("20240101-120000-Water-1H-rabi-nutation");
        std::fs::create_dir_all(&series).unwrap();
        std::fs::write(series.join("b.fid"), b"").unwrap();
        std::fs::write(series.join("a.FID"), b"").unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), b"").unwrap();
        std::fs::write(temp_dir.path().join("c.fid"), b"").unwrap();

        let files = find_fids(temp_dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.FID", "b.fid", "c.fid"]);
    }

    #[test]
    fn test_unreadable_files_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("broken.fid"), b"not a pipe file").unwrap();
        assert!(run_inspect(temp_dir.path(), false).is_ok());
        assert!(run_inspect(&temp_dir.path().join("missing"), false).is_err());
    }
}
