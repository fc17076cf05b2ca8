use blockdev::RamDisk;

use super::entry_set::dir_set_checksum;
use super::types::*;
use super::{ExFatPartition, ExFatVolume};
use crate::cache::CacheOption;
use crate::common::{get_le32, put_le16, FsDirEntry, OpenFlags};
use crate::error::FsError;
use crate::test_support::{exfat_disk, exfat_image, test_clock, ExFatGeometry};

const CLUSTER: usize = 4096;

fn mounted(disk: RamDisk) -> ExFatVolume<RamDisk> {
    let mut vol = ExFatVolume::new(disk);
    vol.begin().unwrap();
    vol
}

fn partition() -> (ExFatPartition<RamDisk>, ExFatGeometry) {
    let (disk, geometry) = exfat_image(0x4000, 3, 0);
    let mut part = ExFatPartition::new(disk);
    part.init(0).unwrap();
    (part, geometry)
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 13 + i / 509) as u8).collect()
}

fn create(vol: &mut ExFatVolume<RamDisk>, path: &str, data: &[u8]) {
    let mut file = vol.open(path, OpenFlags::CREAT | OpenFlags::RDWR).unwrap();
    assert_eq!(file.write(vol.partition_mut(), data).unwrap(), data.len());
    file.close(vol.partition_mut()).unwrap();
}

fn read_all(vol: &mut ExFatVolume<RamDisk>, path: &str) -> Vec<u8> {
    let mut file = vol.open(path, OpenFlags::READ).unwrap();
    let mut out = vec![0u8; file.file_size() as usize];
    assert_eq!(file.read(vol.partition_mut(), &mut out).unwrap(), out.len());
    out
}

#[test]
fn mount_loads_system_entries() {
    let (disk, geometry) = exfat_image(0x4000, 3, 0);
    let mut vol = mounted(disk);
    assert_eq!(vol.cluster_count(), geometry.cluster_count);
    assert_eq!(vol.bytes_per_cluster(), CLUSTER as u32);
    let used = geometry.first_free - 2;
    assert_eq!(vol.free_cluster_count().unwrap(), geometry.cluster_count - used);
    let label: Vec<u16> = "SDFS".encode_utf16().collect();
    assert_eq!(vol.volume_label(), &label[..]);
    assert_eq!(vol.root_length().unwrap(), CLUSTER as u64);
    assert_eq!(
        vol.partition().cluster_heap_start_sector(),
        geometry.heap_offset
    );
    assert_eq!(vol.partition().fat_start_sector(), geometry.fat_offset);
}

#[test]
fn mount_through_mbr_slot() {
    let (disk, geometry) = exfat_image(0x4000, 3, 2048);
    let vol = mounted(disk);
    assert_eq!(vol.partition().fat_start_sector(), 2048 + geometry.fat_offset);
}

#[test]
fn mount_rejects_fat_boot_sector() {
    let disk = crate::test_support::fat16_disk();
    let mut vol = ExFatVolume::new(disk);
    assert_eq!(vol.begin(), Err(FsError::InvalidBootSector));
}

#[test]
fn upcase_table_matches_builtin_map() {
    let mut vol = mounted(exfat_disk());
    let report = vol.check_upcase().unwrap();
    assert!(report.checksum_ok);
    assert_eq!(report.entries, 0x1_0000);
    assert_eq!(report.mismatches, 0);
}

#[test]
fn hello_file_on_64_mib_volume() {
    let (disk, _) = exfat_image(0x2_0000, 3, 0);
    let mut vol = mounted(disk);
    create(&mut vol, "A.TXT", b"hello");
    assert_eq!(read_all(&mut vol, "/A.TXT"), b"hello");

    let mut out = vec![FsDirEntry::default(); 4];
    assert_eq!(vol.ls("/", &mut out).unwrap(), 1);
    assert_eq!(out[0].name.as_str(), "A.TXT");
    assert_eq!(out[0].size, 5);
    assert!(!out[0].is_dir);

    let file = vol.open("/a.txt", OpenFlags::READ).unwrap();
    file.verify_entry_set(vol.partition_mut()).unwrap();
    assert_eq!(file.data_length(), 5);
    assert!(file.is_contiguous());
}

#[test]
fn new_file_grows_contiguously() {
    let (disk, geometry) = exfat_image(0x4000, 3, 0);
    let mut vol = mounted(disk);
    let free = vol.free_cluster_count().unwrap();
    let data = pattern(3 * CLUSTER + 100);
    create(&mut vol, "/BIG.BIN", &data);
    assert_eq!(vol.free_cluster_count().unwrap(), free - 4);

    let file = vol.open("/BIG.BIN", OpenFlags::READ).unwrap();
    assert!(file.is_contiguous());
    assert_eq!(file.first_cluster(), geometry.first_free);
    assert_eq!(file.data_length(), data.len() as u64);
    // Contiguous files leave the FAT alone.
    let part = vol.partition_mut();
    assert_eq!(part.fat_get(geometry.first_free).unwrap(), Some(0));
    assert_eq!(read_all(&mut vol, "/BIG.BIN"), data);
}

#[test]
fn blocked_growth_converts_to_chain() {
    let (disk, geometry) = exfat_image(0x4000, 3, 0);
    let mut vol = mounted(disk);
    let first = geometry.first_free;
    let head = pattern(CLUSTER);
    create(&mut vol, "/ONE.BIN", &head);
    create(&mut vol, "/TWO.BIN", &pattern(CLUSTER));

    let mut file = vol
        .open("/ONE.BIN", OpenFlags::WRITE | OpenFlags::APPEND)
        .unwrap();
    file.write(vol.partition_mut(), b"tail").unwrap();
    assert!(!file.is_contiguous());
    file.close(vol.partition_mut()).unwrap();

    let part = vol.partition_mut();
    assert_eq!(part.fat_get(first).unwrap(), Some(first + 2));
    assert_eq!(part.fat_get(first + 2).unwrap(), None);

    let file = vol.open("/ONE.BIN", OpenFlags::READ).unwrap();
    assert!(!file.is_contiguous());
    let mut expected = head;
    expected.extend_from_slice(b"tail");
    assert_eq!(read_all(&mut vol, "/ONE.BIN"), expected);
    assert_eq!(vol.chain_size(first).unwrap(), 2);
}

#[test]
fn long_run_conversion_links_every_cluster() {
    let (disk, geometry) = exfat_image(0x4000, 3, 0);
    let mut vol = mounted(disk);
    let first = geometry.first_free;
    create(&mut vol, "/RUN.BIN", &pattern(3 * CLUSTER));
    create(&mut vol, "/WALL.BIN", b"w");

    let mut file = vol
        .open("/RUN.BIN", OpenFlags::WRITE | OpenFlags::AT_END)
        .unwrap();
    file.write(vol.partition_mut(), b"!").unwrap();
    file.close(vol.partition_mut()).unwrap();

    let part = vol.partition_mut();
    assert_eq!(part.fat_get(first).unwrap(), Some(first + 1));
    assert_eq!(part.fat_get(first + 1).unwrap(), Some(first + 2));
    assert_eq!(part.fat_get(first + 2).unwrap(), Some(first + 4));
    assert_eq!(part.fat_get(first + 4).unwrap(), None);
    assert_eq!(read_all(&mut vol, "/RUN.BIN")[3 * CLUSTER], b'!');
}

#[test]
fn seek_within_contiguous_and_chained_files() {
    let mut vol = mounted(exfat_disk());
    let data = pattern(3 * CLUSTER);
    create(&mut vol, "/S.BIN", &data);
    let mut file = vol.open("/S.BIN", OpenFlags::READ).unwrap();
    let part = vol.partition_mut();
    file.seek_set(part, 2 * CLUSTER as u64 + 7).unwrap();
    let mut buf = [0u8; 8];
    file.read(part, &mut buf).unwrap();
    assert_eq!(&buf[..], &data[2 * CLUSTER + 7..2 * CLUSTER + 15]);
    file.seek_end(part, -4).unwrap();
    assert_eq!(file.available(), 4);
    assert_eq!(file.seek_cur(part, 5), Err(FsError::SeekOutOfRange));
}

#[test]
fn truncate_returns_exact_tail() {
    let mut vol = mounted(exfat_disk());
    let free = vol.free_cluster_count().unwrap();
    create(&mut vol, "/T.BIN", &pattern(5 * CLUSTER));
    assert_eq!(vol.free_cluster_count().unwrap(), free - 5);
    vol.truncate("/T.BIN", 3000).unwrap();
    assert_eq!(vol.free_cluster_count().unwrap(), free - 1);
    let file = vol.open("/T.BIN", OpenFlags::READ).unwrap();
    assert_eq!(file.data_length(), 3000);
    assert_eq!(file.valid_length(), 3000);
    assert_eq!(read_all(&mut vol, "/T.BIN"), pattern(3000));

    vol.truncate("/T.BIN", 0).unwrap();
    assert_eq!(vol.free_cluster_count().unwrap(), free);
    assert_eq!(vol.open("/T.BIN", OpenFlags::READ).unwrap().first_cluster(), 0);
}

#[test]
fn truncating_a_chain_frees_each_link() {
    let (disk, geometry) = exfat_image(0x4000, 3, 0);
    let mut vol = mounted(disk);
    let free = vol.free_cluster_count().unwrap();
    create(&mut vol, "/ONE.BIN", &pattern(CLUSTER));
    create(&mut vol, "/TWO.BIN", b"2");
    let mut file = vol
        .open("/ONE.BIN", OpenFlags::WRITE | OpenFlags::AT_END)
        .unwrap();
    file.write(vol.partition_mut(), &pattern(2 * CLUSTER)).unwrap();
    file.truncate_to(vol.partition_mut(), 10).unwrap();
    assert_eq!(file.cur_position(), 10);
    file.close(vol.partition_mut()).unwrap();
    assert_eq!(vol.free_cluster_count().unwrap(), free - 2);
    assert_eq!(
        vol.partition_mut().fat_get(geometry.first_free).unwrap(),
        None
    );
}

#[test]
fn pre_allocate_reserves_without_exposing() {
    let mut vol = mounted(exfat_disk());
    let free = vol.free_cluster_count().unwrap();
    let mut file = vol.open("/PRE.BIN", OpenFlags::CREAT | OpenFlags::RDWR).unwrap();
    let part = vol.partition_mut();
    file.pre_allocate(part, 3 * CLUSTER as u64 + 1).unwrap();
    assert_eq!(file.data_length(), 3 * CLUSTER as u64 + 1);
    assert_eq!(file.file_size(), 0);
    assert!(file.is_contiguous());
    assert_eq!(part.free_cluster_count().unwrap(), free - 4);
    let mut buf = [0u8; 4];
    assert_eq!(file.read(part, &mut buf).unwrap(), 0);
    file.write(part, b"data").unwrap();
    assert_eq!(file.pre_allocate(part, 1), Err(FsError::InvalidArgument));
    file.close(part).unwrap();

    let reopened = vol.open("/PRE.BIN", OpenFlags::READ).unwrap();
    assert_eq!(reopened.valid_length(), 4);
    assert_eq!(reopened.data_length(), 3 * CLUSTER as u64 + 1);
    vol.remove("/PRE.BIN").unwrap();
    assert_eq!(vol.free_cluster_count().unwrap(), free);
}

#[test]
fn pre_allocate_fails_without_a_long_enough_run() {
    let mut vol = mounted(exfat_disk());
    let total = vol.cluster_count() as u64;
    let mut file = vol.open("/HUGE.BIN", OpenFlags::CREAT | OpenFlags::RDWR).unwrap();
    assert_eq!(
        file.pre_allocate(vol.partition_mut(), total * CLUSTER as u64),
        Err(FsError::NoContiguousRun)
    );
    assert_eq!(file.first_cluster(), 0);
}

#[test]
fn bitmap_find_wraps_to_space_before_start() {
    let (mut part, geometry) = partition();
    let last = part.last_cluster();
    let first = geometry.first_free;
    part.bitmap_modify(first + 1, last - first, true).unwrap();
    assert_eq!(part.bitmap_find(last - 3, 1).unwrap(), Some(first));
    assert_eq!(part.bitmap_find(last - 3, 2).unwrap(), None);
}

#[test]
fn bitmap_find_from_last_cluster() {
    let (mut part, geometry) = partition();
    let last = part.last_cluster();
    assert_eq!(part.bitmap_find(last, 1).unwrap(), Some(last));
    // A run may not span the wrap.
    assert_eq!(part.bitmap_find(last, 2).unwrap(), Some(geometry.first_free));
}

#[test]
fn bitmap_find_on_full_bitmap() {
    let (mut part, geometry) = partition();
    let last = part.last_cluster();
    let first = geometry.first_free;
    part.bitmap_modify(first, last - first + 1, true).unwrap();
    assert_eq!(part.free_cluster_count().unwrap(), 0);
    assert_eq!(part.bitmap_find(0, 1).unwrap(), None);
    assert_eq!(part.bitmap_find(first + 10, 1).unwrap(), None);
}

#[test]
fn bitmap_run_ending_on_last_cluster() {
    let (mut part, geometry) = partition();
    let last = part.last_cluster();
    let first = geometry.first_free;
    part.bitmap_modify(first, last - first - 2, true).unwrap();
    assert_eq!(part.free_cluster_count().unwrap(), 3);
    assert_eq!(part.bitmap_find(0, 3).unwrap(), Some(last - 2));
    assert_eq!(part.bitmap_find(0, 4).unwrap(), None);
}

#[test]
fn bitmap_modify_conflict_changes_nothing() {
    let (mut part, geometry) = partition();
    let first = geometry.first_free;
    assert_eq!(
        part.bitmap_modify(first, 2, false),
        Err(FsError::BitmapConflict(first))
    );
    part.bitmap_modify(first + 1, 1, true).unwrap();
    assert_eq!(
        part.bitmap_modify(first, 2, true),
        Err(FsError::BitmapConflict(first + 1))
    );
    assert_eq!(part.bitmap_find(first, 1).unwrap(), Some(first));
    let free = part.free_cluster_count().unwrap();
    part.bitmap_modify(first + 1, 1, false).unwrap();
    assert_eq!(part.free_cluster_count().unwrap(), free + 1);
    let last = part.last_cluster();
    assert_eq!(part.bitmap_modify(last, 2, true), Err(FsError::BadCluster(last)));
}

#[test]
fn corrupted_sets_fail_verification() {
    let mut vol = mounted(exfat_disk());
    create(&mut vol, "/A.TXT", b"abc");
    let file = vol.open("/A.TXT", OpenFlags::READ).unwrap();
    let part = vol.partition_mut();
    file.verify_entry_set(part).unwrap();

    let mut name_pos = file.dir_pos();
    assert!(part.dir_seek(&mut name_pos, 64).unwrap());
    let entry = part.dir_cache(&name_pos, CacheOption::FOR_WRITE).unwrap();
    assert_eq!(entry[0], TYPE_NAME);
    put_le16(entry, NAME_UNICODE, b'B' as u16);
    assert_eq!(file.verify_entry_set(part), Err(FsError::ChecksumMismatch));

    let mut pos = file.dir_pos();
    let mut checksum = 0u16;
    for idx in 0..3 {
        if idx > 0 {
            part.dir_seek(&mut pos, 32).unwrap();
        }
        checksum = dir_set_checksum(part.dir_cache(&pos, CacheOption::FOR_READ).unwrap(), checksum);
    }
    let entry = part.dir_cache(&file.dir_pos(), CacheOption::FOR_WRITE).unwrap();
    put_le16(entry, FILE_SET_CHECKSUM, checksum);
    assert_eq!(file.verify_entry_set(part), Err(FsError::NameHashMismatch));
}

#[test]
fn long_and_unicode_names() {
    let mut vol = mounted(exfat_disk());
    let long = "a fairly long file name.txt";
    create(&mut vol, long, b"1");
    create(&mut vol, "Ünïcödé.txt", b"22");
    assert_eq!(read_all(&mut vol, "/A FAIRLY LONG FILE NAME.TXT"), b"1");
    assert_eq!(read_all(&mut vol, "/ÜNÏCÖDÉ.TXT"), b"22");

    let file = vol.open(long, OpenFlags::READ).unwrap();
    let mut name: heapless::String<64> = heapless::String::new();
    file.get_name(vol.partition_mut(), &mut name).unwrap();
    assert_eq!(name.as_str(), long);

    let mut out = vec![FsDirEntry::default(); 4];
    assert_eq!(vol.ls("/", &mut out).unwrap(), 2);
    assert_eq!(out[1].name.as_str(), "Ünïcödé.txt");
    assert_eq!(out[1].size, 2);
}

#[test]
fn open_flag_errors() {
    let mut vol = mounted(exfat_disk());
    create(&mut vol, "/A.TXT", b"a");
    vol.mkdir("/DIR", false).unwrap();
    assert_eq!(vol.open("/B.TXT", OpenFlags::READ).err(), Some(FsError::NotFound));
    let flags = OpenFlags::CREAT | OpenFlags::EXCL | OpenFlags::WRITE;
    assert_eq!(vol.open("/A.TXT", flags).err(), Some(FsError::AlreadyExists));
    assert_eq!(vol.open("/DIR", OpenFlags::WRITE).err(), Some(FsError::IsDirectory));
    assert_eq!(vol.open("/A.TXT/X", OpenFlags::READ).err(), Some(FsError::NotDirectory));
    assert_eq!(
        vol.open("/C.TXT", OpenFlags::CREAT | OpenFlags::READ).err(),
        Some(FsError::NotWritable)
    );
    assert!(vol.exists("/dir"));
}

#[test]
fn mkdir_rmdir_and_nested_paths() {
    let mut vol = mounted(exfat_disk());
    let free = vol.free_cluster_count().unwrap();
    vol.mkdir("/P/Q", true).unwrap();
    assert_eq!(vol.free_cluster_count().unwrap(), free - 2);
    let q = vol.open("/P/Q", OpenFlags::READ).unwrap();
    assert!(q.is_subdir());
    assert!(q.is_contiguous());
    assert_eq!(q.data_length(), CLUSTER as u64);

    vol.chdir("/P").unwrap();
    create(&mut vol, "Q/F.TXT", b"f");
    assert_eq!(vol.rmdir("/P/Q"), Err(FsError::NotEmpty));
    vol.remove("Q/F.TXT").unwrap();
    vol.rmdir("Q").unwrap();
    vol.chdir("/").unwrap();
    vol.rmdir("/P").unwrap();
    assert_eq!(vol.free_cluster_count().unwrap(), free);
    assert!(!vol.exists("/P"));
}

#[test]
fn rename_keeps_data_and_lengths() {
    let mut vol = mounted(exfat_disk());
    vol.mkdir("/DST", false).unwrap();
    let data = pattern(2 * CLUSTER + 5);
    create(&mut vol, "/src.bin", &data);
    let free = vol.free_cluster_count().unwrap();
    vol.rename("/src.bin", "/DST/renamed with spaces.bin").unwrap();
    assert_eq!(vol.free_cluster_count().unwrap(), free);
    assert!(!vol.exists("/src.bin"));
    assert_eq!(read_all(&mut vol, "/DST/renamed with spaces.bin"), data);
    let moved = vol
        .open("/DST/renamed with spaces.bin", OpenFlags::READ)
        .unwrap();
    assert!(moved.is_contiguous());
    moved.verify_entry_set(vol.partition_mut()).unwrap();
}

#[test]
fn rename_directory_moves_contents() {
    let mut vol = mounted(exfat_disk());
    vol.mkdir("/X", false).unwrap();
    vol.mkdir("/Y", false).unwrap();
    create(&mut vol, "/X/IN.TXT", b"inside");
    vol.rename("/X", "/Y/X2").unwrap();
    assert!(!vol.exists("/X"));
    assert_eq!(read_all(&mut vol, "/Y/X2/IN.TXT"), b"inside");
    assert!(vol.stat("/Y/X2").unwrap().is_dir);
}

#[test]
fn root_grows_through_the_fat() {
    let mut vol = mounted(exfat_disk());
    for idx in 0..50 {
        let file = vol
            .open(&format!("/F{idx}.TXT"), OpenFlags::CREAT | OpenFlags::WRITE)
            .unwrap();
        assert!(file.is_file());
    }
    assert_eq!(vol.root_length().unwrap(), 2 * CLUSTER as u64);
    let mut out = vec![FsDirEntry::default(); 64];
    assert_eq!(vol.ls("/", &mut out).unwrap(), 50);
    assert_eq!(out[49].name.as_str(), "F49.TXT");
}

#[test]
fn subdirectory_grows_and_stays_contiguous() {
    let mut vol = mounted(exfat_disk());
    vol.mkdir("/MANY", false).unwrap();
    for idx in 0..60 {
        create(&mut vol, &format!("/MANY/N{idx}.TXT"), b"");
    }
    let dir = vol.open("/MANY", OpenFlags::READ).unwrap();
    assert_eq!(dir.data_length(), 2 * CLUSTER as u64);
    assert!(dir.is_contiguous());
    let mut out = vec![FsDirEntry::default(); 64];
    assert_eq!(vol.ls("/MANY", &mut out).unwrap(), 60);
}

#[test]
fn create_stamps_file_entry() {
    let mut vol = mounted(exfat_disk());
    vol.set_date_time_callback(Some(test_clock));
    create(&mut vol, "/STAMP.TXT", b"t");
    let file = vol.open("/STAMP.TXT", OpenFlags::READ).unwrap();
    let part = vol.partition_mut();
    let entry = part.dir_cache(&file.dir_pos(), CacheOption::FOR_READ).unwrap();
    assert_eq!(get_le32(entry, FILE_CREATE_TIME), test_clock().exfat_stamp());
    assert_eq!(get_le32(entry, FILE_MODIFY_TIME), test_clock().exfat_stamp());
    file.verify_entry_set(part).unwrap();
}

#[test]
fn cache_invalidate_rereads_device() {
    let mut vol = mounted(exfat_disk());
    create(&mut vol, "/C.TXT", b"cached");
    vol.partition_mut().cache_invalidate();
    assert_eq!(read_all(&mut vol, "/C.TXT"), b"cached");
}

#[test]
fn working_directory_grows_in_place() {
    let mut vol = mounted(exfat_disk());
    let free = vol.free_cluster_count().unwrap();
    vol.mkdir("/D", false).unwrap();
    vol.chdir("/D").unwrap();
    for idx in 0..60 {
        create(&mut vol, &format!("F{idx}.TXT"), b"");
    }
    assert_eq!(vol.vwd().data_length(), 2 * CLUSTER as u64);
    for idx in 0..60 {
        assert!(vol.exists(&format!("F{idx}.TXT")), "F{idx}.TXT");
        assert!(vol.exists(&format!("/D/F{idx}.TXT")), "/D/F{idx}.TXT");
    }
    let dir = vol.open("/D", OpenFlags::READ).unwrap();
    assert_eq!(dir.data_length(), 2 * CLUSTER as u64);
    assert!(dir.is_contiguous());
    assert_eq!(vol.free_cluster_count().unwrap(), free - 2);
    let mut out = vec![FsDirEntry::default(); 64];
    assert_eq!(vol.ls("/D", &mut out).unwrap(), 60);
}

#[test]
fn stale_working_directory_is_reloaded() {
    let mut vol = mounted(exfat_disk());
    let free = vol.free_cluster_count().unwrap();
    vol.mkdir("/D", false).unwrap();
    vol.chdir("/D").unwrap();
    // Absolute paths grow /D through a handle other than the vwd.
    for idx in 0..50 {
        create(&mut vol, &format!("/D/A{idx}.TXT"), b"");
    }
    assert_eq!(vol.vwd().data_length(), CLUSTER as u64);
    for idx in 0..50 {
        create(&mut vol, &format!("B{idx}.TXT"), b"");
    }
    for idx in 0..50 {
        assert!(vol.exists(&format!("A{idx}.TXT")), "A{idx}.TXT");
        assert!(vol.exists(&format!("/D/B{idx}.TXT")), "/D/B{idx}.TXT");
    }
    let dir = vol.open("/D", OpenFlags::READ).unwrap();
    assert_eq!(dir.data_length(), 3 * CLUSTER as u64);
    assert!(dir.is_contiguous());
    assert_eq!(vol.free_cluster_count().unwrap(), free - 3);
}

#[test]
fn relative_mkdir_grows_working_directory() {
    let mut vol = mounted(exfat_disk());
    vol.mkdir("/P", false).unwrap();
    vol.chdir("/P").unwrap();
    for idx in 0..45 {
        vol.mkdir(&format!("S{idx}"), false).unwrap();
    }
    assert_eq!(vol.vwd().data_length(), 2 * CLUSTER as u64);
    for idx in 0..45 {
        assert!(vol.stat(&format!("/P/S{idx}")).unwrap().is_dir);
    }
}

#[test]
fn bitmap_runs_round_trip() {
    let (mut part, geometry) = partition();
    let free = part.free_cluster_count().unwrap();
    for k in 1..=16u32 {
        let first = part.bitmap_find(0, k).unwrap().unwrap();
        assert_eq!(first, geometry.first_free);
        part.bitmap_modify(first, k, true).unwrap();
        assert_eq!(part.free_cluster_count().unwrap(), free - k);
        part.bitmap_modify(first, k, false).unwrap();
        assert_eq!(part.free_cluster_count().unwrap(), free);
    }
}

#[test]
fn chained_allocation_round_trip() {
    let (mut part, geometry) = partition();
    let free = part.free_cluster_count().unwrap();
    for k in 1..=8u32 {
        // Every other cluster, so each link is a separate run.
        let clusters: Vec<u32> = (0..k).map(|i| geometry.first_free + 2 * i).collect();
        for (idx, &cluster) in clusters.iter().enumerate() {
            part.bitmap_modify(cluster, 1, true).unwrap();
            let next = clusters.get(idx + 1).copied().unwrap_or(EXFAT_EOC);
            part.fat_put(cluster, next).unwrap();
        }
        assert_eq!(part.chain_size(clusters[0]).unwrap(), k);
        assert_eq!(part.free_cluster_count().unwrap(), free - k);
        part.free_chain(clusters[0]).unwrap();
        assert_eq!(part.free_cluster_count().unwrap(), free);
        for &cluster in &clusters {
            assert_eq!(part.fat_get(cluster).unwrap(), Some(0));
        }
    }
}
