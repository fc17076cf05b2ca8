#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
mod file_disk;
#[cfg(feature = "std")]
mod ram_disk;

#[cfg(feature = "std")]
pub use file_disk::FileDisk;
#[cfg(feature = "std")]
pub use ram_disk::RamDisk;

pub const SECTOR_SIZE: usize = 512;
pub const SECTOR_SHIFT: u32 = 9;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceError {
    Read(u32),
    Write(u32),
    OutOfRange(u32),
    BadBufferLength(usize),
    Sync,
}

/// Raw 512-byte sector transport consumed by the filesystem engines.
///
/// Transfers either complete or fail; there is no partial-transfer result.
pub trait BlockDevice {
    fn read_sector(&mut self, sector: u32, dst: &mut [u8; SECTOR_SIZE]) -> Result<(), DeviceError>;

    fn write_sector(&mut self, sector: u32, src: &[u8; SECTOR_SIZE]) -> Result<(), DeviceError>;

    fn sector_count(&mut self) -> Result<u32, DeviceError>;

    fn read_sectors(&mut self, sector: u32, dst: &mut [u8]) -> Result<(), DeviceError> {
        if dst.len() % SECTOR_SIZE != 0 {
            return Err(DeviceError::BadBufferLength(dst.len()));
        }
        for (idx, chunk) in dst.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            let lba = sector.saturating_add(idx as u32);
            let chunk: &mut [u8; SECTOR_SIZE] = chunk
                .try_into()
                .map_err(|_| DeviceError::BadBufferLength(SECTOR_SIZE))?;
            self.read_sector(lba, chunk)?;
        }
        Ok(())
    }

    fn write_sectors(&mut self, sector: u32, src: &[u8]) -> Result<(), DeviceError> {
        if src.len() % SECTOR_SIZE != 0 {
            return Err(DeviceError::BadBufferLength(src.len()));
        }
        for (idx, chunk) in src.chunks_exact(SECTOR_SIZE).enumerate() {
            let lba = sector.saturating_add(idx as u32);
            let chunk: &[u8; SECTOR_SIZE] = chunk
                .try_into()
                .map_err(|_| DeviceError::BadBufferLength(SECTOR_SIZE))?;
            self.write_sector(lba, chunk)?;
        }
        Ok(())
    }

    fn sync_device(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for &mut T {
    fn read_sector(&mut self, sector: u32, dst: &mut [u8; SECTOR_SIZE]) -> Result<(), DeviceError> {
        (**self).read_sector(sector, dst)
    }

    fn write_sector(&mut self, sector: u32, src: &[u8; SECTOR_SIZE]) -> Result<(), DeviceError> {
        (**self).write_sector(sector, src)
    }

    fn sector_count(&mut self) -> Result<u32, DeviceError> {
        (**self).sector_count()
    }

    fn read_sectors(&mut self, sector: u32, dst: &mut [u8]) -> Result<(), DeviceError> {
        (**self).read_sectors(sector, dst)
    }

    fn write_sectors(&mut self, sector: u32, src: &[u8]) -> Result<(), DeviceError> {
        (**self).write_sectors(sector, src)
    }

    fn sync_device(&mut self) -> Result<(), DeviceError> {
        (**self).sync_device()
    }
}
