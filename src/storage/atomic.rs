//! Write-then-rename helpers
//!
//! Readers never observe a partially written file: content goes to a
//! sibling `*.tmp` file which is synced and renamed over the target.

use crate::error::{PipelineError, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Sibling temporary path for `path`
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `path` atomically using `write` to fill the temporary file
pub fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| PipelineError::sink(path.display().to_string(), e))?;
    }

    let tmp = tmp_path(path);
    let outcome = File::create(&tmp)
        .map_err(PipelineError::from)
        .and_then(|mut file| {
            write(&mut file)?;
            file.sync_all()?;
            Ok(())
        })
        .and_then(|_| fs::rename(&tmp, path).map_err(PipelineError::from));

    if let Err(e) = outcome {
        let _ = fs::remove_file(&tmp);
        return Err(match e {
            PipelineError::SinkWriteFailure { .. } => e,
            other => PipelineError::sink(path.display().to_string(), other),
        });
    }
    Ok(())
}

/// Serialize `value` as pretty JSON into `path` atomically
pub fn write_json_atomically<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    write_atomically(path, |file| {
        serde_json::to_writer_pretty(&mut *file, value)?;
        file.write_all(b"\n")?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_tmp_path_is_sibling() {
        let tmp = tmp_path(Path::new("/data/gold/2024-01-01.parquet"));
        assert_eq!(tmp, PathBuf::from("/data/gold/2024-01-01.parquet.tmp"));
    }

    #[test]
    fn test_write_creates_parent_and_leaves_no_tmp() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("nested").join("out.json");

        write_json_atomically(&target, &vec![1, 2, 3]).unwrap();

        let contents = fs::read_to_string(&target).unwrap();
        let parsed: Vec<i32> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed, vec![1, 2, 3]);
        assert!(!tmp_path(&target).exists());
    }

    #[test]
    fn test_failed_write_keeps_previous_file() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.txt");
        fs::write(&target, "previous").unwrap();

        let result = write_atomically(&target, |file| {
            file.write_all(b"half")?;
            Err(PipelineError::ColumnarError("encoder failed".to_string()))
        });

        assert!(matches!(result, Err(PipelineError::SinkWriteFailure { .. })));
        assert_eq!(fs::read_to_string(&target).unwrap(), "previous");
        assert!(!tmp_path(&target).exists());
    }
}
