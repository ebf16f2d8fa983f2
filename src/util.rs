use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::StageError;
use crate::reader::reader_from_path;

/// Identifier used to match mates and screening hits: the first word of the
/// header with any leading `@` and trailing `/1` or `/2` removed.
pub(crate) fn normalize_read_id(raw: &str) -> &str {
    let word = raw.split_whitespace().next().unwrap_or("");
    let word = word.strip_prefix('@').unwrap_or(word);
    word.strip_suffix("/1")
        .or_else(|| word.strip_suffix("/2"))
        .unwrap_or(word)
}

/// Number of FASTQ records in `path`.
pub fn count_records(path: &Path) -> Result<u64, StageError> {
    let reader = reader_from_path(path).map_err(|err| StageError::io(path, err))?;
    let mut total = 0;
    for record in reader.records() {
        record.map_err(|source| StageError::Fastq {
            path: path.to_path_buf(),
            source,
        })?;
        total += 1;
    }
    Ok(total)
}

pub fn write_nreads(path: &Path, count: u64) -> io::Result<()> {
    fs::write(path, format!("nreads\n{count}\n"))
}

/// Parse a count file; the `nreads` header line is optional.
pub fn read_nreads(path: &Path) -> io::Result<Option<u64>> {
    let text = fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && *line != "nreads")
        .last()
        .and_then(|line| line.parse().ok()))
}

/// Make `link` point at `target` without copying the reads.
pub(crate) fn link_through(target: &Path, link: &Path) -> io::Result<()> {
    let target = fs::canonicalize(target)?;
    std::os::unix::fs::symlink(target, link)
}

/// Move staged files into place. Pairs are `(staged, final)`; the first pair is
/// moved last. A final file with nothing staged for it is a leftover and is removed.
pub(crate) fn promote(moves: &[(PathBuf, PathBuf)]) -> Result<(), StageError> {
    for (staged, target) in moves.iter().rev() {
        if staged.symlink_metadata().is_err() {
            if target.symlink_metadata().is_ok() {
                fs::remove_file(target).map_err(|err| StageError::io(target, err))?;
            }
            continue;
        }
        fs::rename(staged, target).map_err(|err| StageError::io(target, err))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_read_id() {
        assert_eq!(normalize_read_id("read7/1"), "read7");
        assert_eq!(normalize_read_id("@read7/2 extra words"), "read7");
        assert_eq!(normalize_read_id("SRR01.5 1:N:0"), "SRR01.5");
        assert_eq!(normalize_read_id("plain"), "plain");
        assert_eq!(normalize_read_id(""), "");
    }

    #[test]
    fn test_nreads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("S1_input.nreads");
        write_nreads(&path, 1000).unwrap();
        assert_eq!(read_nreads(&path).unwrap(), Some(1000));

        let headerless = dir.path().join("old.nreads");
        fs::write(&headerless, "950").unwrap();
        assert_eq!(read_nreads(&headerless).unwrap(), Some(950));

        let garbage = dir.path().join("bad.nreads");
        fs::write(&garbage, "nreads\nlots\n").unwrap();
        assert_eq!(read_nreads(&garbage).unwrap(), None);
    }

    #[test]
    fn test_promote_moves_staged_files() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("staged.1");
        let target = dir.path().join("final.1");
        fs::write(&staged, "x").unwrap();
        let leftover = dir.path().join("final.3");
        fs::write(&leftover, "stale").unwrap();
        let missing = (dir.path().join("staged.3"), leftover.clone());

        promote(&[(staged.clone(), target.clone()), missing]).unwrap();
        assert!(target.exists());
        assert!(!staged.exists());
        assert!(!leftover.exists());
    }
}
