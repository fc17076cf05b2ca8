mod api_read_write;
mod bitmap;
mod cluster_utils;
mod dir_ops;
mod dir_scan;
mod entry_set;
mod exfat_mount;
mod types;
pub mod upcase;
mod volume;

#[cfg(test)]
mod tests;

pub use api_read_write::ExFatFile;
pub use exfat_mount::ExFatPartition;
pub use types::DirPos;
pub use upcase::UpcaseReport;
pub use volume::ExFatVolume;
