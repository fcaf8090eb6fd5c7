use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{PageId, PAGE_SIZE};
use crate::storage::page::Page;

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager is responsible for the actual page I/O against the database file
pub struct DiskManager {
    db_file: Mutex<File>,
}

impl DiskManager {
    /// Open (or create) the database file at the given path
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        Ok(Self {
            db_file: Mutex::new(file),
        })
    }

    /// Read a page from disk into the given buffer.
    ///
    /// A page past the end of the file has never been written; it comes back
    /// zero-filled so freshly allocated pages read consistently.
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), DiskManagerError> {
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = self.page_offset(page_id);
        let mut buffer = [0u8; PAGE_SIZE];

        {
            let mut file = self.db_file.lock();

            let file_size = file.metadata()?.len();
            if offset as u64 >= file_size {
                page.data.fill(0);
                page.page_id = page_id;
                return Ok(());
            }

            file.seek(SeekFrom::Start(offset as u64))?;
            file.read_exact(&mut buffer)?;
        }

        page.data.copy_from_slice(&buffer);
        page.page_id = page_id;

        Ok(())
    }

    /// Write a page to disk at the offset determined by its id
    pub fn write_page(&self, page: &Page) -> Result<(), DiskManagerError> {
        if page.page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page.page_id));
        }

        let offset = self.page_offset(page.page_id);

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(&page.data)?;
        file.flush()?;

        Ok(())
    }

    fn page_offset(&self, page_id: PageId) -> usize {
        page_id as usize * PAGE_SIZE
    }
}
