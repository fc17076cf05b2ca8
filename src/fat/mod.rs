mod api_read_write;
mod cluster_utils;
mod dir_ops;
mod dir_scan;
mod fat_mount;
mod names_lfn;
mod names_sfn;
mod types;
mod volume;


pub use api_read_write::FatFile;
pub use fat_mount::FatPartition;
pub use types::FatType;
pub use volume::FatVolume;

pub(crate) use names_lfn::LfnState;
