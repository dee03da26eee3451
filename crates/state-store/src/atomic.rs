use std::io;
use std::path::Path;

use serde::Serialize;

/// Write `value` as pretty JSON to `path` via the temp-then-rename pattern
/// (§4.12, matching the atomic-save style used throughout the corpus):
/// a crash mid-write leaves the old file untouched instead of a truncated one.
pub fn atomic_write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> io::Result<()> {
    let path = path.as_ref();
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    atomic_write_text(path, &content)
}

pub fn atomic_write_text(path: impl AsRef<Path>, content: &str) -> io::Result<()> {
    let path = path.as_ref();
    let tmp_path = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        a: i32,
    }

    #[test]
    fn atomic_write_leaves_no_tmp_file_behind() {
        let dir = std::env::temp_dir().join(format!("state-store-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sample.json");
        atomic_write_json(&path, &Sample { a: 7 }).unwrap();
        let loaded: Sample = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, Sample { a: 7 });
        assert!(!path.with_extension("json.tmp").exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}
