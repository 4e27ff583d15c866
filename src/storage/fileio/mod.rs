use std::{fs::File, io, path::Path};

#[cfg(target_family = "unix")]
mod unix;

#[cfg(target_family = "unix")]
pub use self::unix::UnixFileIO as PlatformFileIO;

pub trait FileIO {
    fn read(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()>;
    fn write(file: &File, buf: &[u8], offset: u64) -> io::Result<()>;
    fn len(file: &File) -> io::Result<u64>;
    fn open_file(path: &Path, write: bool) -> io::Result<File>;
    fn create_file(path: &Path) -> io::Result<File>;
}
