use crate::{BlockDevice, DeviceError, SECTOR_SIZE};

/// Memory-backed disk image used by host tests and tools.
pub struct RamDisk {
    data: Vec<u8>,
    reads: u64,
    writes: u64,
    writes_left: Option<u64>,
}

impl RamDisk {
    pub fn new(sector_count: u32) -> Self {
        Self::from_image(vec![0u8; sector_count as usize * SECTOR_SIZE])
    }

    pub fn from_image(mut data: Vec<u8>) -> Self {
        let rem = data.len() % SECTOR_SIZE;
        if rem != 0 {
            data.resize(data.len() + SECTOR_SIZE - rem, 0);
        }
        Self {
            data,
            reads: 0,
            writes: 0,
            writes_left: None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_image(self) -> Vec<u8> {
        self.data
    }

    pub fn sector(&self, sector: u32) -> &[u8] {
        let start = sector as usize * SECTOR_SIZE;
        &self.data[start..start + SECTOR_SIZE]
    }

    pub fn read_count(&self) -> u64 {
        self.reads
    }

    pub fn write_count(&self) -> u64 {
        self.writes
    }

    /// Lets `count` more sector writes succeed, then fails every write.
    /// `None` removes the limit.
    pub fn fail_writes_after(&mut self, count: Option<u64>) {
        self.writes_left = count;
    }

    fn range(&self, sector: u32) -> Result<core::ops::Range<usize>, DeviceError> {
        let start = sector as usize * SECTOR_SIZE;
        let end = start + SECTOR_SIZE;
        if end > self.data.len() {
            return Err(DeviceError::OutOfRange(sector));
        }
        Ok(start..end)
    }
}

impl BlockDevice for RamDisk {
    fn read_sector(&mut self, sector: u32, dst: &mut [u8; SECTOR_SIZE]) -> Result<(), DeviceError> {
        let range = self.range(sector)?;
        dst.copy_from_slice(&self.data[range]);
        self.reads += 1;
        Ok(())
    }

    fn write_sector(&mut self, sector: u32, src: &[u8; SECTOR_SIZE]) -> Result<(), DeviceError> {
        let range = self.range(sector)?;
        if let Some(left) = self.writes_left.as_mut() {
            if *left == 0 {
                return Err(DeviceError::Write(sector));
            }
            *left -= 1;
        }
        self.data[range].copy_from_slice(src);
        self.writes += 1;
        Ok(())
    }

    fn sector_count(&mut self) -> Result<u32, DeviceError> {
        Ok((self.data.len() / SECTOR_SIZE) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_sector_transfer_round_trips() {
        let mut disk = RamDisk::new(8);
        let mut src = [0u8; SECTOR_SIZE * 3];
        for (idx, byte) in src.iter_mut().enumerate() {
            *byte = (idx % 251) as u8;
        }
        disk.write_sectors(2, &src).unwrap();
        let mut dst = [0u8; SECTOR_SIZE * 3];
        disk.read_sectors(2, &mut dst).unwrap();
        assert_eq!(src, dst);
        assert_eq!(disk.write_count(), 3);
    }

    #[test]
    fn out_of_range_sector_is_rejected() {
        let mut disk = RamDisk::new(4);
        let mut buf = [0u8; SECTOR_SIZE];
        assert_eq!(disk.read_sector(4, &mut buf), Err(DeviceError::OutOfRange(4)));
    }

    #[test]
    fn partial_sector_buffer_is_rejected() {
        let mut disk = RamDisk::new(4);
        let mut buf = [0u8; 100];
        assert_eq!(
            disk.read_sectors(0, &mut buf),
            Err(DeviceError::BadBufferLength(100))
        );
    }

    #[test]
    fn write_failure_injection_counts_down() {
        let mut disk = RamDisk::new(4);
        let buf = [0xAAu8; SECTOR_SIZE];
        disk.fail_writes_after(Some(1));
        assert!(disk.write_sector(0, &buf).is_ok());
        assert_eq!(disk.write_sector(1, &buf), Err(DeviceError::Write(1)));
        disk.fail_writes_after(None);
        assert!(disk.write_sector(1, &buf).is_ok());
    }
}
