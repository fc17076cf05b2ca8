use blockdev::DeviceError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsError {
    Device(DeviceError),
    NoPartition,
    InvalidBootSector,
    UnsupportedSectorSize(u16),
    UnsupportedSectorsPerCluster(u8),
    UnsupportedFatCount(u8),
    UnsupportedFatType,
    BadCluster(u32),
    BitmapConflict(u32),
    ChecksumMismatch,
    NameHashMismatch,
    CorruptEntry,
    ChainTooLong,
    InvalidPath,
    InvalidName,
    NameTooLong,
    NotFound,
    AlreadyExists,
    NotDirectory,
    IsDirectory,
    NotEmpty,
    NotOpen,
    AlreadyOpen,
    ReadOnly,
    NotWritable,
    NotReadable,
    SeekOutOfRange,
    FileTooLarge,
    InvalidArgument,
    WrongVolume,
    NoFreeCluster,
    NoContiguousRun,
    DirectoryFull,
}

impl From<DeviceError> for FsError {
    fn from(value: DeviceError) -> Self {
        Self::Device(value)
    }
}
