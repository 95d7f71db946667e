use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Page-granular access to one table file.
pub struct PageManager {
    file: File,
    table_id: u32,
    page_size: usize,
}

impl PageManager {
    /// Opens an existing file.
    pub fn open(path: &Path, table_id: u32, page_size: usize) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        Ok(Self {
            file,
            table_id,
            page_size,
        })
    }

    /// Opens the file at `path`, creating an empty one if it is missing.
    pub fn open_or_create(path: &Path, table_id: u32, page_size: usize) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Ok(Self {
            file,
            table_id,
            page_size,
        })
    }

    pub fn read_page(&mut self, page_number: u32, buf: &mut [u8]) -> StorageResult<()> {
        self.check_len(buf.len())?;

        let offset = self.page_offset(page_number);
        let file_size = self.file.metadata()?.len();

        if offset + self.page_size as u64 > file_size {
            return Err(StorageError::PageNotFound(PageId::new(
                self.table_id,
                page_number,
            )));
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;

        Ok(())
    }

    pub fn write_page(&mut self, page_number: u32, data: &[u8]) -> StorageResult<()> {
        self.check_len(data.len())?;

        let offset = self.page_offset(page_number);
        let file_size = self.file.metadata()?.len();

        // Extend file if necessary
        if offset >= file_size {
            self.file.set_len(offset + self.page_size as u64)?;
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.sync_all()?;

        Ok(())
    }

    pub fn num_pages(&self) -> StorageResult<u32> {
        let file_size = self.file.metadata()?.len();
        Ok((file_size / self.page_size as u64) as u32)
    }

    fn check_len(&self, len: usize) -> StorageResult<()> {
        if len != self.page_size {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("buffer must be {} bytes, got {}", self.page_size, len),
            )));
        }
        Ok(())
    }

    fn page_offset(&self, page_number: u32) -> u64 {
        page_number as u64 * self.page_size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    const PAGE_SIZE: usize = 4096;

    #[test]
    fn test_open_or_create_then_open() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");

        {
            let pm = PageManager::open_or_create(&file_path, 1, PAGE_SIZE)?;
            assert_eq!(pm.num_pages()?, 0);
        }

        {
            let pm = PageManager::open(&file_path, 1, PAGE_SIZE)?;
            assert_eq!(pm.num_pages()?, 0);
        }

        Ok(())
    }

    #[test]
    fn test_write_and_read_page() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        let mut pm = PageManager::open_or_create(&file_path, 1, PAGE_SIZE)?;

        let mut write_buf = vec![0u8; PAGE_SIZE];
        write_buf[0] = 42;
        write_buf[PAGE_SIZE - 1] = 24;
        pm.write_page(0, &write_buf)?;

        let mut read_buf = vec![0u8; PAGE_SIZE];
        pm.read_page(0, &mut read_buf)?;

        assert_eq!(read_buf[0], 42);
        assert_eq!(read_buf[PAGE_SIZE - 1], 24);

        Ok(())
    }

    #[test]
    fn test_small_page_size() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        let mut pm = PageManager::open_or_create(&file_path, 1, 128)?;

        for i in 0..3u8 {
            pm.write_page(i as u32, &[i; 128])?;
        }
        assert_eq!(pm.num_pages()?, 3);
        assert_eq!(std::fs::metadata(&file_path)?.len(), 384);

        let mut buf = [0u8; 128];
        pm.read_page(2, &mut buf)?;
        assert!(buf.iter().all(|&b| b == 2));

        Ok(())
    }

    #[test]
    fn test_read_nonexistent_page() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        let mut pm = PageManager::open_or_create(&file_path, 3, PAGE_SIZE)?;

        let mut buf = vec![0u8; PAGE_SIZE];
        let result = pm.read_page(10, &mut buf);
        assert!(matches!(
            result,
            Err(StorageError::PageNotFound(pid)) if pid == PageId::new(3, 10)
        ));

        Ok(())
    }

    #[test]
    fn test_invalid_buffer_size() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        let mut pm = PageManager::open_or_create(&file_path, 1, PAGE_SIZE)?;

        let mut small_buf = vec![0u8; 100];
        assert!(pm.read_page(0, &mut small_buf).is_err());

        let small_data = vec![0u8; 100];
        assert!(pm.write_page(0, &small_data).is_err());

        Ok(())
    }

    #[test]
    fn test_open_nonexistent_file() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("nonexistent.db");

        assert!(PageManager::open(&file_path, 1, PAGE_SIZE).is_err());
        assert!(PageManager::open_or_create(&file_path, 1, PAGE_SIZE).is_ok());

        Ok(())
    }

    #[test]
    fn test_file_growth() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        let mut pm = PageManager::open_or_create(&file_path, 1, PAGE_SIZE)?;

        // Write to page 5 (skipping 0-4)
        pm.write_page(5, &vec![5u8; PAGE_SIZE])?;
        assert_eq!(pm.num_pages()?, 6);

        Ok(())
    }

    #[test]
    fn test_persistence() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");

        {
            let mut pm = PageManager::open_or_create(&file_path, 1, PAGE_SIZE)?;
            pm.write_page(0, &vec![99u8; PAGE_SIZE])?;
        }

        {
            let mut pm = PageManager::open_or_create(&file_path, 1, PAGE_SIZE)?;
            let mut buf = vec![0u8; PAGE_SIZE];
            pm.read_page(0, &mut buf)?;
            assert_eq!(buf[0], 99);
        }

        Ok(())
    }
}
