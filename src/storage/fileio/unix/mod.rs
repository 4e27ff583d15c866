use nix::libc;
use std::fs::OpenOptions;
use std::os::unix::prelude::{FileExt, OpenOptionsExt};
use std::path::Path;
use std::{fs::File, io};

use super::FileIO;

pub struct UnixFileIO;

impl UnixFileIO {
    fn open_or_create_file(path: &Path, write: bool, create: bool) -> io::Result<File> {
        // when write finishes, we want to be sure that contents have been persisted.
        // O_DIRECT is left out: page images live in ordinary heap buffers that
        // carry no sector alignment.
        let flags = libc::O_SYNC;

        OpenOptions::new()
            .custom_flags(flags)
            .read(true)
            .write(write)
            .create(create)
            .open(path)
    }
}

impl FileIO for UnixFileIO {
    fn read(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
        // uses pread syscall internally (only available on unix-like os)
        // allows for parallel reads at offset without lseek
        file.read_exact_at(buf, offset)
    }

    fn write(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
        // uses pwrite syscall internally (only available on unix-like os)
        // allows for parallel writes at offset without lseek
        file.write_all_at(buf, offset)
    }

    fn len(file: &File) -> io::Result<u64> {
        Ok(file.metadata()?.len())
    }

    fn open_file(path: &Path, write: bool) -> io::Result<File> {
        UnixFileIO::open_or_create_file(path, write, false)
    }

    fn create_file(path: &Path) -> io::Result<File> {
        UnixFileIO::open_or_create_file(path, true, true)
    }
}
