use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::{BlockDevice, DeviceError, SECTOR_SIZE};

/// Disk image stored in a host file.
pub struct FileDisk {
    file: File,
    sectors: u32,
}

impl FileDisk {
    pub fn new(file: File) -> Result<Self, DeviceError> {
        let len = file.metadata().map_err(|_| DeviceError::Read(0))?.len();
        let sectors = u32::try_from(len / SECTOR_SIZE as u64).map_err(|_| DeviceError::OutOfRange(u32::MAX))?;
        Ok(Self { file, sectors })
    }

    pub fn into_file(self) -> File {
        self.file
    }

    fn seek_to(&mut self, sector: u32) -> Result<(), DeviceError> {
        if sector >= self.sectors {
            return Err(DeviceError::OutOfRange(sector));
        }
        self.file
            .seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64))
            .map(|_| ())
            .map_err(|_| DeviceError::OutOfRange(sector))
    }
}

impl BlockDevice for FileDisk {
    fn read_sector(&mut self, sector: u32, dst: &mut [u8; SECTOR_SIZE]) -> Result<(), DeviceError> {
        self.seek_to(sector)?;
        self.file.read_exact(dst).map_err(|_| DeviceError::Read(sector))
    }

    fn write_sector(&mut self, sector: u32, src: &[u8; SECTOR_SIZE]) -> Result<(), DeviceError> {
        self.seek_to(sector)?;
        self.file.write_all(src).map_err(|_| DeviceError::Write(sector))
    }

    fn sector_count(&mut self) -> Result<u32, DeviceError> {
        Ok(self.sectors)
    }

    fn read_sectors(&mut self, sector: u32, dst: &mut [u8]) -> Result<(), DeviceError> {
        if dst.len() % SECTOR_SIZE != 0 {
            return Err(DeviceError::BadBufferLength(dst.len()));
        }
        let count = (dst.len() / SECTOR_SIZE) as u32;
        if sector.checked_add(count).is_none_or(|end| end > self.sectors) {
            return Err(DeviceError::OutOfRange(sector));
        }
        self.seek_to(sector)?;
        self.file.read_exact(dst).map_err(|_| DeviceError::Read(sector))
    }

    fn write_sectors(&mut self, sector: u32, src: &[u8]) -> Result<(), DeviceError> {
        if src.len() % SECTOR_SIZE != 0 {
            return Err(DeviceError::BadBufferLength(src.len()));
        }
        let count = (src.len() / SECTOR_SIZE) as u32;
        if sector.checked_add(count).is_none_or(|end| end > self.sectors) {
            return Err(DeviceError::OutOfRange(sector));
        }
        self.seek_to(sector)?;
        self.file.write_all(src).map_err(|_| DeviceError::Write(sector))
    }

    fn sync_device(&mut self) -> Result<(), DeviceError> {
        self.file.sync_data().map_err(|_| DeviceError::Sync)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_backed_sectors_persist() {
        let tmp = tempfile::tempfile().unwrap();
        tmp.set_len(16 * SECTOR_SIZE as u64).unwrap();
        let mut disk = FileDisk::new(tmp).unwrap();
        assert_eq!(disk.sector_count().unwrap(), 16);

        let src = [0x5Au8; SECTOR_SIZE];
        disk.write_sector(15, &src).unwrap();
        disk.sync_device().unwrap();
        let mut dst = [0u8; SECTOR_SIZE];
        disk.read_sector(15, &mut dst).unwrap();
        assert_eq!(src, dst);
        assert_eq!(disk.read_sector(16, &mut dst), Err(DeviceError::OutOfRange(16)));
    }
}
