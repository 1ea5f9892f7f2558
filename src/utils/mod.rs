use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};

/// Ensure directory exists
pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {:?}", path))?;
    }
    Ok(())
}

/// Check if file exists
pub fn file_exists<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref().is_file()
}

/// Write `path` through a temporary sibling and rename it into place.
///
/// The final file only ever appears fully written, so its presence marks a
/// completed partition on resume.
pub fn write_atomic<P, F>(path: P, write: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnOnce(&Path) -> Result<()>,
{
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let tmp = temporary_path(path);
    if let Err(e) = write(&tmp) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {:?} into place", path))?;
    Ok(())
}

/// Hidden sibling that keeps the extension, so table writers detect the format
fn temporary_path(path: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".tmp.");
    name.push(path.file_name().unwrap_or_default());
    path.with_file_name(name)
}

/// Format duration as human-readable string
pub fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if secs < 3600.0 {
        format!("{:.1}m", secs / 60.0)
    } else {
        format!("{:.1}h", secs / 3600.0)
    }
}

/// Format number with commas
pub fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();

    for (count, c) in s.chars().rev().enumerate() {
        if count > 0 && count % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }

    result.chars().rev().collect()
}

/// Progress bar for a long loop
pub fn progress_bar(len: u64, message: &str) -> ProgressBar {
    let bar = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
    {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar.set_message(message.to_string());
    bar
}

/// Random number utilities
pub mod random {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// Create RNG with fixed seed
    pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(seed)
    }

    /// Stable per-label seed: FNV-1a over the label, mixed with `seed`
    pub fn derive_seed(seed: u64, label: &str) -> u64 {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;
        label
            .bytes()
            .fold(OFFSET ^ seed, |hash, byte| (hash ^ byte as u64).wrapping_mul(PRIME))
    }
}

/// Summary statistics over plain slices
pub mod stats {
    /// Linear-interpolation quantile, `None` for an empty slice
    pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let rank = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
        let lower = rank.floor() as usize;
        let upper = rank.ceil() as usize;
        let weight = rank - lower as f64;
        Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
    }

    pub fn mean(values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }

    /// Sample standard deviation
    pub fn std_dev(values: &[f64]) -> Option<f64> {
        if values.len() < 2 {
            return None;
        }
        let mu = mean(values)?;
        let var = values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
        Some(var.sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.0), "30.0s");
        assert_eq!(format_duration(90.0), "1.5m");
        assert_eq!(format_duration(3600.0), "1.0h");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1000000), "1,000,000");
        assert_eq!(format_number(999), "999");
    }

    #[test]
    fn test_derive_seed() {
        let a = random::derive_seed(42, "K562_rep1");
        assert_eq!(a, random::derive_seed(42, "K562_rep1"));
        assert_ne!(a, random::derive_seed(42, "K562_rep2"));
        assert_ne!(a, random::derive_seed(43, "K562_rep1"));
    }

    #[test]
    fn test_quantile() {
        let values = [4.0, 1.0, 3.0, 2.0, 5.0];
        assert_relative_eq!(stats::quantile(&values, 0.0).unwrap(), 1.0);
        assert_relative_eq!(stats::quantile(&values, 0.5).unwrap(), 3.0);
        assert_relative_eq!(stats::quantile(&values, 0.1).unwrap(), 1.4);
        assert_relative_eq!(stats::quantile(&values, 1.0).unwrap(), 5.0);
        assert_eq!(stats::quantile(&[], 0.1), None);
    }

    #[test]
    fn test_std_dev() {
        assert_relative_eq!(stats::std_dev(&[1.0, 2.0, 3.0]).unwrap(), 1.0);
        assert_eq!(stats::std_dev(&[1.0]), None);
    }

    #[test]
    fn test_write_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested/peptides.csv");

        let failed = write_atomic(&target, |tmp| {
            std::fs::write(tmp, "partial")?;
            anyhow::bail!("interrupted")
        });
        assert!(failed.is_err());
        assert!(!target.exists());
        assert!(!dir.path().join("nested/.tmp.peptides.csv").exists());

        write_atomic(&target, |tmp| Ok(std::fs::write(tmp, "peptide\n")?)).unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "peptide\n");
    }
}
