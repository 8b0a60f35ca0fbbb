use flatfat::blockdev::{BlockError, BlockStore, FileDisk, BLOCK_SIZE};
use flatfat::volume::{format, FileSystem, FsError};
use tempfile::TempDir;

#[test]
fn test_image_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("volume.img");

    let mut disk = FileDisk::create(&path, 40).unwrap();
    format(&mut disk).unwrap();
    let mut fs = FileSystem::new();
    fs.mount(disk).unwrap();

    let data: Vec<u8> = (0..3 * BLOCK_SIZE + 123).map(|i| (i % 97) as u8).collect();
    fs.create("image.dat").unwrap();
    let fd = fs.open("image.dat").unwrap();
    assert_eq!(fs.write(fd, &data).unwrap(), data.len());
    fs.close(fd).unwrap();
    fs.unmount().unwrap().close().unwrap();

    assert_eq!(
        std::fs::metadata(&path).unwrap().len(),
        40 * BLOCK_SIZE as u64
    );

    let mut fs = FileSystem::new();
    fs.mount(FileDisk::open(&path).unwrap()).unwrap();
    let info = fs.info().unwrap();
    assert_eq!(info.total_blocks, 40);
    assert_eq!(info.free_data_blocks, 37 - 1 - 4);

    let fd = fs.open("image.dat").unwrap();
    assert_eq!(fs.stat(fd).unwrap() as usize, data.len());
    assert_eq!(&fs.read(fd, data.len()).unwrap()[..], &data[..]);
    fs.close(fd).unwrap();
    fs.unmount().unwrap();
}

#[test]
fn test_open_rejects_ragged_image() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ragged.img");
    std::fs::write(&path, vec![0u8; BLOCK_SIZE + 10]).unwrap();

    assert!(matches!(
        FileDisk::open(&path),
        Err(BlockError::InvalidImage(_))
    ));
}

#[test]
fn test_unformatted_image_does_not_mount() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("blank.img");
    let disk = FileDisk::create(&path, 8).unwrap();

    let mut fs = FileSystem::new();
    assert!(matches!(fs.mount(disk), Err(FsError::InvalidVolume(_))));
}
