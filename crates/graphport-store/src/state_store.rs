//! Resumable-state side-store.
//!
//! A long-running transform checkpoints two things between entities: the
//! aspect remap table (a plain two-column `(source, target)` table) and the
//! importer's JSON state blob. Both live in one small file next to the
//! target: a magic header, then two length-prefixed bincode sections.

use crate::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 8] = b"GPSTATE\0";
const FORMAT_VERSION: u8 = 1;

/// What a checkpoint holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedState {
    /// `(source, target)` raw id pairs of the aspect remap table.
    pub aspect_remap: Vec<(u64, u64)>,
    /// Serialized importer state (see the transform crate).
    pub importer_json: String,
}

/// One checkpoint file on disk.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Write a checkpoint, replacing any previous one.
    pub fn save(&self, state: &SavedState) -> StoreResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;

        file.write_all(MAGIC)?;
        file.write_all(&[FORMAT_VERSION])?;
        write_section(&mut file, &state.aspect_remap)?;
        write_section(&mut file, &state.importer_json)?;
        file.sync_data()?;
        Ok(())
    }

    pub fn load(&self) -> StoreResult<SavedState> {
        let mut file = File::open(&self.path)?;

        let mut magic = [0u8; 8];
        file.read_exact(&mut magic)
            .map_err(|_| StoreError::Corrupt("truncated header".to_string()))?;
        if &magic != MAGIC {
            return Err(StoreError::Corrupt("bad magic".to_string()));
        }
        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != FORMAT_VERSION {
            return Err(StoreError::Corrupt(format!(
                "unsupported state format version {}",
                version[0]
            )));
        }

        let aspect_remap = read_section(&mut file)?;
        let importer_json = read_section(&mut file)?;
        Ok(SavedState {
            aspect_remap,
            importer_json,
        })
    }
}

fn write_section<T: Serialize>(file: &mut File, value: &T) -> StoreResult<()> {
    let data = bincode::serialize(value)
        .map_err(|e| StoreError::Corrupt(format!("serialize: {e}")))?;
    file.write_all(&(data.len() as u32).to_le_bytes())?;
    file.write_all(&data)?;
    Ok(())
}

fn read_section<T: for<'de> Deserialize<'de>>(file: &mut File) -> StoreResult<T> {
    let mut len_bytes = [0u8; 4];
    file.read_exact(&mut len_bytes)
        .map_err(|_| StoreError::Corrupt("truncated section length".to_string()))?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    let mut data = vec![0u8; len];
    file.read_exact(&mut data)
        .map_err(|_| StoreError::Corrupt("truncated section body".to_string()))?;
    bincode::deserialize(&data).map_err(|e| StoreError::Corrupt(format!("deserialize: {e}")))
}
