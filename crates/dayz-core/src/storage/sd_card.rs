use alloc::vec::Vec;

use embedded_sdmmc::{
    Directory, Error, Mode, SdCard, SdCardError, TimeSource, VolumeIdx, VolumeManager,
};
use log::{info, warn};

use super::{FileSystem, StorageError};

/// Consecutive device errors before the card is considered pulled
const MAX_CONSECUTIVE_FAILURES: u8 = 3;

type SdResult<R> = Result<R, Error<SdCardError>>;
type Dir<'a, S, D, T> = Directory<'a, SdCard<S, D>, T, 4, 4, 1>;

/// [`FileSystem`] over the first FAT volume of an SPI SD card
///
/// These SD card operations are blocking (the card shares the SPI bus with
/// the display). Every call opens and closes the volume, so a card swapped
/// while unmounted is picked up by [`FileSystem::try_remount`].
pub struct SdCardFileSystem<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    volume_mgr: VolumeManager<SdCard<S, D>, T, 4, 4, 1>,
    mounted: bool,
    failures: u8,
}

fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("", path),
    }
}

impl<S, D, T> SdCardFileSystem<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    pub fn new(sd_card: SdCard<S, D>, ts: T) -> Self {
        let mut fs = Self {
            volume_mgr: VolumeManager::new(sd_card, ts),
            mounted: false,
            failures: 0,
        };
        fs.try_remount();
        fs
    }

    /// Run `f` inside the directory `dirs` (`/`-separated, relative to root)
    fn with_dir<R>(
        &self,
        dirs: &str,
        create: bool,
        f: impl FnOnce(&Dir<'_, S, D, T>) -> SdResult<R>,
    ) -> SdResult<R> {
        let volume = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let mut dir = volume.open_root_dir()?;
        for name in dirs.split('/').filter(|c| !c.is_empty()) {
            if create {
                match dir.make_dir_in_dir(name) {
                    Ok(()) | Err(Error::DirAlreadyExists) => {}
                    Err(e) => return Err(e),
                }
            }
            dir.change_dir(name)?;
        }

        let result = f(&dir);

        // Explicitly close them to handle errors
        dir.close()?;
        volume.close()?;
        result
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.mounted {
            Ok(())
        } else {
            Err(StorageError::NotMounted)
        }
    }

    /// Map a driver result, tracking device errors towards an unmount
    fn track<R>(&mut self, result: SdResult<R>, failure: StorageError) -> Result<R, StorageError> {
        match result {
            Ok(value) => {
                self.failures = 0;
                Ok(value)
            }
            Err(Error::NotFound) => Err(StorageError::NotFound),
            Err(e) => {
                self.failures = self.failures.saturating_add(1);
                warn!("SD card error ({} in a row): {:?}", self.failures, e);
                if self.failures >= MAX_CONSECUTIVE_FAILURES {
                    warn!("SD card marked unmounted");
                    self.mounted = false;
                }
                Err(failure)
            }
        }
    }
}

impl<S, D, T> FileSystem for SdCardFileSystem<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    fn is_mounted(&self) -> bool {
        self.mounted
    }

    fn try_remount(&mut self) -> bool {
        if self.mounted {
            return true;
        }
        let probe = self
            .volume_mgr
            .open_volume(VolumeIdx(0))
            .and_then(|volume| volume.close());
        if probe.is_ok() {
            info!("SD card mounted");
            self.mounted = true;
            self.failures = 0;
        }
        self.mounted
    }

    fn exists(&mut self, path: &str) -> bool {
        if !self.mounted {
            return false;
        }
        let (dirs, leaf) = split_path(path);
        self.with_dir(dirs, false, |dir| dir.find_directory_entry(leaf))
            .is_ok()
    }

    fn read_to_end(&mut self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.check()?;
        let (dirs, leaf) = split_path(path);
        let result = self.with_dir(dirs, false, |dir| {
            let file = dir.open_file_in_dir(leaf, Mode::ReadOnly)?;
            let mut contents = Vec::new();
            let mut buffer = [0u8; 512];
            while !file.is_eof() {
                let read = file.read(&mut buffer)?;
                if read == 0 {
                    break; // EOF
                }
                contents.extend_from_slice(&buffer[..read]);
            }
            file.close()?;
            Ok(contents)
        });
        self.track(result, StorageError::ReadFailed)
    }

    fn read_head(&mut self, path: &str, len: usize) -> Result<Vec<u8>, StorageError> {
        self.check()?;
        let (dirs, leaf) = split_path(path);
        let result = self.with_dir(dirs, false, |dir| {
            let file = dir.open_file_in_dir(leaf, Mode::ReadOnly)?;
            let mut contents = alloc::vec![0u8; len];
            let mut filled = 0;
            while filled < len && !file.is_eof() {
                let read = file.read(&mut contents[filled..])?;
                if read == 0 {
                    break;
                }
                filled += read;
            }
            file.close()?;
            contents.truncate(filled);
            Ok(contents)
        });
        self.track(result, StorageError::ReadFailed)
    }

    fn write_all(&mut self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        self.check()?;
        let (dirs, leaf) = split_path(path);
        let result = self.with_dir(dirs, false, |dir| {
            let file = dir.open_file_in_dir(leaf, Mode::ReadWriteCreateOrTruncate)?;
            file.write(data)?;
            file.flush()?;
            file.close()
        });
        self.track(result, StorageError::WriteFailed)
    }

    fn append(&mut self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        self.check()?;
        let (dirs, leaf) = split_path(path);
        let result = self.with_dir(dirs, false, |dir| {
            let file = dir.open_file_in_dir(leaf, Mode::ReadWriteCreateOrAppend)?;
            file.write(data)?;
            file.flush()?;
            file.close()
        });
        self.track(result, StorageError::WriteFailed)
    }

    fn create_dir_all(&mut self, path: &str) -> Result<(), StorageError> {
        self.check()?;
        let result = self.with_dir(path, true, |_| Ok(()));
        self.track(result, StorageError::WriteFailed)
    }

    fn remove(&mut self, path: &str) -> Result<(), StorageError> {
        self.check()?;
        let (dirs, leaf) = split_path(path);
        let result = self.with_dir(dirs, false, |dir| dir.delete_file_in_dir(leaf));
        self.track(result, StorageError::WriteFailed)
    }
}
