//! In-memory volume formatters for the test suites.

use blockdev::{RamDisk, SECTOR_SIZE};

use crate::common::{put_le16, put_le32, put_le64, MbrPartition};
use crate::exfat::upcase::UpcaseTable;
use crate::fat::FatType;

const SECTOR: usize = SECTOR_SIZE;

fn sector_mut(disk: &mut RamDisk, sector: u32) -> &mut [u8] {
    let start = sector as usize * SECTOR;
    &mut disk.as_bytes_mut()[start..start + SECTOR]
}

fn write_mbr(disk: &mut RamDisk, start: u32, total: u32, kind: u8) {
    let entry = MbrPartition {
        boot: 0,
        kind,
        relative_sectors: start,
        total_sectors: total,
    };
    entry.write(sector_mut(disk, 0), 1);
}

/// Geometry picked by [`fat_image`].
#[derive(Clone, Copy, Debug)]
pub(crate) struct FatGeometry {
    pub fat_type: FatType,
    pub sectors_per_fat: u32,
    pub data_start: u32,
    pub cluster_count: u32,
}

/// Formats `total` sectors as an empty FAT volume of type `fat_type`. A
/// non-zero `start` puts the volume in MBR slot 1.
pub(crate) fn fat_image(
    total: u32,
    sectors_per_cluster: u8,
    fat_type: FatType,
    start: u32,
) -> (RamDisk, FatGeometry) {
    let mut disk = RamDisk::new(start + total);
    let reserved: u32 = if fat_type == FatType::Fat32 { 32 } else { 1 };
    let root_entries: u32 = if fat_type == FatType::Fat32 { 0 } else { 512 };
    let root_sectors = root_entries * 32 / SECTOR as u32;
    let spc = sectors_per_cluster as u32;

    let mut sectors_per_fat = 1u32;
    let (data_start, cluster_count) = loop {
        let data_start = reserved + 2 * sectors_per_fat + root_sectors;
        let clusters = (total - data_start) / spc;
        let fat_bytes = match fat_type {
            FatType::Fat12 => (clusters + 2) * 3 / 2 + 1,
            FatType::Fat16 => (clusters + 2) * 2,
            FatType::Fat32 => (clusters + 2) * 4,
        };
        let needed = fat_bytes.div_ceil(SECTOR as u32);
        if needed <= sectors_per_fat {
            break (data_start, clusters);
        }
        sectors_per_fat = needed;
    };
    assert_eq!(FatType::from_cluster_count(cluster_count), fat_type);

    let bpb = sector_mut(&mut disk, start);
    bpb[..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
    bpb[3..11].copy_from_slice(b"SDFSTEST");
    put_le16(bpb, 11, SECTOR as u16);
    bpb[13] = sectors_per_cluster;
    put_le16(bpb, 14, reserved as u16);
    bpb[16] = 2;
    put_le16(bpb, 17, root_entries as u16);
    if total < 0x1_0000 {
        put_le16(bpb, 19, total as u16);
    } else {
        put_le32(bpb, 32, total);
    }
    bpb[21] = 0xF8;
    if fat_type == FatType::Fat32 {
        put_le32(bpb, 36, sectors_per_fat);
        put_le32(bpb, 44, 2);
    } else {
        put_le16(bpb, 22, sectors_per_fat as u16);
    }
    bpb[510] = 0x55;
    bpb[511] = 0xAA;

    let head: &[u8] = match fat_type {
        FatType::Fat12 => &[0xF8, 0xFF, 0xFF],
        FatType::Fat16 => &[0xF8, 0xFF, 0xFF, 0xFF],
        FatType::Fat32 => &[
            0xF8, 0xFF, 0xFF, 0x0F, 0xFF, 0xFF, 0xFF, 0x0F, 0xFF, 0xFF, 0xFF, 0x0F,
        ],
    };
    for copy in 0..2 {
        let fat = sector_mut(&mut disk, start + reserved + copy * sectors_per_fat);
        fat[..head.len()].copy_from_slice(head);
    }

    if start != 0 {
        let kind = if fat_type == FatType::Fat32 { 0x0C } else { 0x06 };
        write_mbr(&mut disk, start, total, kind);
    }
    let geometry = FatGeometry {
        fat_type,
        sectors_per_fat,
        data_start,
        cluster_count,
    };
    (disk, geometry)
}

/// 32 MiB FAT16 volume with 2 KiB clusters.
pub(crate) fn fat16_disk() -> RamDisk {
    fat_image(0x1_0000, 4, FatType::Fat16, 0).0
}

/// 68 MiB FAT32 volume with 512-byte clusters.
pub(crate) fn fat32_disk() -> RamDisk {
    fat_image(0x2_2000, 1, FatType::Fat32, 0).0
}

/// 2 MiB FAT12 volume with 512-byte clusters.
#[cfg(feature = "fat12")]
pub(crate) fn fat12_disk() -> RamDisk {
    fat_image(4096, 1, FatType::Fat12, 0).0
}

/// Geometry picked by [`exfat_image`].
#[derive(Clone, Copy, Debug)]
pub(crate) struct ExFatGeometry {
    pub fat_offset: u32,
    pub heap_offset: u32,
    pub cluster_count: u32,
    pub bitmap_cluster: u32,
    pub upcase_cluster: u32,
    pub root_cluster: u32,
    /// First cluster a fresh volume hands out.
    pub first_free: u32,
}

/// Formats `total` sectors as an empty exFAT volume with clusters of
/// `1 << cluster_shift` sectors. A non-zero `start` puts the volume in MBR
/// slot 1.
pub(crate) fn exfat_image(total: u32, cluster_shift: u8, start: u32) -> (RamDisk, ExFatGeometry) {
    let mut disk = RamDisk::new(start + total);
    let spc = 1u32 << cluster_shift;
    let cluster_bytes = spc as usize * SECTOR;
    let fat_offset = 128u32;

    let mut fat_length = 1u32;
    let (heap_offset, cluster_count) = loop {
        let heap_offset = (fat_offset + fat_length).next_multiple_of(spc);
        let clusters = (total - heap_offset) >> cluster_shift;
        let needed = ((clusters + 2) * 4).div_ceil(SECTOR as u32);
        if needed <= fat_length {
            break (heap_offset, clusters);
        }
        fat_length = needed;
    };

    let bitmap_bytes = (cluster_count as usize).div_ceil(8);
    let bitmap_clusters = bitmap_bytes.div_ceil(cluster_bytes) as u32;
    let upcase: Vec<u16> = UpcaseTable::new().collect();
    let (upcase_bytes, upcase_checksum) = UpcaseTable::summary();
    let upcase_clusters = (upcase_bytes as usize).div_ceil(cluster_bytes) as u32;
    let bitmap_cluster = 2;
    let upcase_cluster = bitmap_cluster + bitmap_clusters;
    let root_cluster = upcase_cluster + upcase_clusters;
    let first_free = root_cluster + 1;

    let cluster_offset =
        |cluster: u32| (start + heap_offset + ((cluster - 2) << cluster_shift)) as usize * SECTOR;

    {
        let boot = sector_mut(&mut disk, start);
        boot[..3].copy_from_slice(&[0xEB, 0x76, 0x90]);
        boot[3..11].copy_from_slice(b"EXFAT   ");
        put_le64(boot, 64, start as u64);
        put_le64(boot, 72, total as u64);
        put_le32(boot, 80, fat_offset);
        put_le32(boot, 84, fat_length);
        put_le32(boot, 88, heap_offset);
        put_le32(boot, 92, cluster_count);
        put_le32(boot, 96, root_cluster);
        put_le32(boot, 100, 0x5D5F_0001);
        put_le16(boot, 104, 0x0100);
        boot[108] = 9;
        boot[109] = cluster_shift;
        boot[110] = 1;
        boot[111] = 0x80;
        boot[510] = 0x55;
        boot[511] = 0xAA;
    }

    let image = disk.as_bytes_mut();
    let fat = (start + fat_offset) as usize * SECTOR;
    put_le32(image, fat, 0xFFFF_FFF8);
    put_le32(image, fat + 4, 0xFFFF_FFFF);
    let mut link = |first: u32, count: u32| {
        for cluster in first..first + count {
            let next = if cluster + 1 == first + count { 0xFFFF_FFFF } else { cluster + 1 };
            put_le32(image, fat + 4 * cluster as usize, next);
        }
    };
    link(bitmap_cluster, bitmap_clusters);
    link(upcase_cluster, upcase_clusters);
    link(root_cluster, 1);

    let bitmap = cluster_offset(bitmap_cluster);
    for bit in 0..(first_free - 2) as usize {
        image[bitmap + bit / 8] |= 1 << (bit % 8);
    }

    let table = cluster_offset(upcase_cluster);
    for (k, unit) in upcase.iter().enumerate() {
        put_le16(image, table + 2 * k, *unit);
    }

    let root = cluster_offset(root_cluster);
    let label = &mut image[root..root + 32];
    label[0] = 0x83;
    label[1] = 4;
    for (k, unit) in "SDFS".encode_utf16().enumerate() {
        put_le16(label, 2 + 2 * k, unit);
    }
    let entry = &mut image[root + 32..root + 64];
    entry[0] = 0x81;
    put_le32(entry, 20, bitmap_cluster);
    put_le64(entry, 24, bitmap_bytes as u64);
    let entry = &mut image[root + 64..root + 96];
    entry[0] = 0x82;
    put_le32(entry, 4, upcase_checksum);
    put_le32(entry, 20, upcase_cluster);
    put_le64(entry, 24, upcase_bytes as u64);

    if start != 0 {
        write_mbr(&mut disk, start, total, 0x07);
    }
    let geometry = ExFatGeometry {
        fat_offset,
        heap_offset,
        cluster_count,
        bitmap_cluster,
        upcase_cluster,
        root_cluster,
        first_free,
    };
    (disk, geometry)
}

/// 8 MiB exFAT volume with 4 KiB clusters.
pub(crate) fn exfat_disk() -> RamDisk {
    exfat_image(0x4000, 3, 0).0
}

/// Fixed clock for stamp assertions: 2024-05-17 12:30:10.
pub(crate) fn test_clock() -> crate::datetime::FsTimestamp {
    use crate::datetime::{fs_date, fs_time, FsTimestamp};
    FsTimestamp {
        date: fs_date(2024, 5, 17),
        time: fs_time(12, 30, 10),
        ms10: 0,
    }
}
