
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const FINAL_INDEX: &str = "final_index.arrow";
const FINAL_META: &str = "final_meta.json";

/// One index file and its side record inside a checkpoint directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Document count when the checkpoint was taken; `None` for the final pair
    pub count: Option<u64>,
    pub index_path: PathBuf,
    pub meta_path: PathBuf,
}

impl Checkpoint {
    #[inline]
    pub fn numbered(dir: &Path, count: u64) -> Self {
        Self {
            count: Some(count),
            index_path: dir.join(format!("index_{count}.arrow")),
            meta_path: dir.join(format!("meta_{count}.json")),
        }
    }

    #[inline]
    pub fn final_pair(dir: &Path) -> Self {
        Self {
            count: None,
            index_path: dir.join(FINAL_INDEX),
            meta_path: dir.join(FINAL_META),
        }
    }

    #[inline]
    pub fn is_final(&self) -> bool {
        self.count.is_none()
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.index_path.is_file() && self.meta_path.is_file()
    }
}

fn parse_count(file_name: &str) -> Option<u64> {
    file_name
        .strip_prefix("index_")?
        .strip_suffix(".arrow")?
        .parse()
        .ok()
}

fn is_checkpoint_file(file_name: &str) -> bool {
    if file_name == FINAL_INDEX || file_name == FINAL_META {
        return true;
    }
    let numbered = file_name
        .strip_prefix("index_")
        .and_then(|rest| rest.strip_suffix(".arrow"))
        .or_else(|| {
            file_name
                .strip_prefix("meta_")
                .and_then(|rest| rest.strip_suffix(".json"))
        });
    numbered.is_some_and(|count| !count.is_empty() && count.bytes().all(|b| b.is_ascii_digit()))
}

/// Numbered checkpoints in `dir` whose index and side record both exist,
/// ordered by document count
#[inline]
pub fn list_checkpoints(dir: &Path) -> io::Result<Vec<Checkpoint>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut checkpoints: Vec<Checkpoint> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| parse_count(&entry.file_name().to_string_lossy()))
        .map(|count| Checkpoint::numbered(dir, count))
        .filter(Checkpoint::is_complete)
        .collect();

    checkpoints.sort_by_key(|checkpoint| checkpoint.count);
    Ok(checkpoints)
}

/// The final pair when present, otherwise the highest numbered checkpoint
#[inline]
pub fn latest_checkpoint(dir: &Path) -> io::Result<Option<Checkpoint>> {
    let final_pair = Checkpoint::final_pair(dir);
    if final_pair.is_complete() {
        return Ok(Some(final_pair));
    }

    Ok(list_checkpoints(dir)?.pop())
}

/// Remove every numbered and final checkpoint file in `dir`, returning how
/// many were deleted. Other files are left alone.
#[inline]
pub fn clear_checkpoints(dir: &Path) -> io::Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if is_checkpoint_file(&entry.file_name().to_string_lossy()) {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}
