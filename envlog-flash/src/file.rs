//! File-backed flash image.
//!
//! The whole device lives in one image file of `page_size * page_count`
//! bytes:
//! - Creation: the image is filled with erased bytes
//! - Erase: a page is overwritten with erased bytes
//! - Program: bytes are written in place after checking they are erased

use crate::error::FlashError;
use crate::{FlashGeometry, PageId, PageStore, ERASED_BYTE};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Default image file name inside a data directory.
pub const IMAGE_FILENAME: &str = "flash.img";

/// A flash device stored in a single image file.
pub struct FileFlash {
    path: PathBuf,
    file: File,
    geometry: FlashGeometry,
    sync_pending: bool,
}

impl FileFlash {
    /// Creates a new, fully erased image file.
    pub fn create(path: impl AsRef<Path>, geometry: FlashGeometry) -> Result<Self, FlashError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let blank = vec![ERASED_BYTE; geometry.page_size];
        for _ in 0..geometry.page_count {
            file.write_all(&blank)?;
        }
        file.sync_all()?;

        tracing::debug!(
            "Created flash image {} ({} pages of {} bytes)",
            path.display(),
            geometry.page_count,
            geometry.page_size
        );

        Ok(Self {
            path,
            file,
            geometry,
            sync_pending: false,
        })
    }

    /// Opens an existing image file, checking its size against `geometry`.
    pub fn open(path: impl AsRef<Path>, geometry: FlashGeometry) -> Result<Self, FlashError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let actual = file.metadata()?.len();
        if actual != geometry.total_size() {
            return Err(FlashError::GeometryMismatch {
                expected: geometry.total_size(),
                actual,
            });
        }

        Ok(Self {
            path,
            file,
            geometry,
            sync_pending: false,
        })
    }

    /// Opens the image if it exists, otherwise creates it.
    pub fn open_or_create(
        path: impl AsRef<Path>,
        geometry: FlashGeometry,
    ) -> Result<Self, FlashError> {
        let path = path.as_ref();
        if path.exists() {
            Self::open(path, geometry)
        } else {
            Self::create(path, geometry)
        }
    }

    /// Returns the image file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PageStore for FileFlash {
    fn geometry(&self) -> FlashGeometry {
        self.geometry
    }

    fn read(&mut self, page: PageId, buf: &mut [u8]) -> Result<(), FlashError> {
        self.geometry.check(page, buf.len())?;
        self.file
            .seek(SeekFrom::Start(self.geometry.page_offset(page)))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn erase(&mut self, page: PageId) -> Result<(), FlashError> {
        self.geometry.check(page, 0)?;
        let blank = vec![ERASED_BYTE; self.geometry.page_size];
        self.file
            .seek(SeekFrom::Start(self.geometry.page_offset(page)))?;
        self.file.write_all(&blank)?;
        self.sync_pending = true;
        Ok(())
    }

    fn program(&mut self, page: PageId, data: &[u8]) -> Result<(), FlashError> {
        self.geometry.check(page, data.len())?;

        let mut current = vec![0u8; data.len()];
        self.read(page, &mut current)?;
        if let Some(offset) = current.iter().position(|&b| b != ERASED_BYTE) {
            return Err(FlashError::NotErased { page, offset });
        }

        self.file
            .seek(SeekFrom::Start(self.geometry.page_offset(page)))?;
        self.file.write_all(data)?;
        self.sync_pending = true;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), FlashError> {
        if self.sync_pending {
            self.file.sync_data()?;
            self.sync_pending = false;
        }
        Ok(())
    }
}
