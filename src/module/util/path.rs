//! Path Operations Module
//!
//! This module handles path operations for directories and files.

use std::path::PathBuf;

/// Join Paths
///
/// This function takes a slice of strings as input and joins them into a single path string.
/// It uses the PathBuf type to handle platform-specific separators and conversions.
/// Non UTF-8 components are replaced lossily.
pub fn join(paths: &[&str]) -> String {
    let mut path: PathBuf = PathBuf::new();
    for p in paths {
        path.push(p);
    }
    path.to_string_lossy().into_owned()
}

pub mod dir {
    //! Directory Operations Submodule
    //!
    //! This submodule provides functions for directory operations.

    use std::fs;
    use std::path::Path;

    use super::{ViewerDir, ViewerImg, ViewerPath};
    use crate::module::define;
    use crate::module::error::ViewerError;

    /// Create Directory from Path List
    ///
    /// This function takes a slice of strings as input and creates a directory with the joined path.
    /// It returns `Some(path)` if the directory creation succeeds, or `None` if it fails.
    pub fn create_dir_from_path_list(paths: &[&str]) -> Option<String> {
        let path = super::join(paths);
        match fs::create_dir_all(Path::new(&path)) {
            Ok(_) => Some(path),
            Err(e) => {
                log::warn!("Can't create {}: {}", path, e);
                None
            }
        }
    }

    /// Create Subdirectory in Either Directory
    ///
    /// Uses `dir1` as the parent when it exists, `dir2` otherwise.
    pub fn create_subdir_in_either_dir(dir1: &str, dir2: &str, name: &str) -> Option<String> {
        let parent: &str = match Path::new(dir1).is_dir() {
            true => dir1,
            false => dir2,
        };
        create_dir_from_path_list(&[parent, name])
    }

    /// Create Application Subdirectory and Paths
    ///
    /// The data directory lives under `define::path::PERSISTENT_DIR` when it exists and
    /// under `define::path::EPHEMERAL_DIR` otherwise. Images and logs get their own
    /// subdirectories; the last annotated frame goes to the ephemeral directory.
    pub fn create_app_sub_dir() -> Result<ViewerPath, ViewerError> {
        create_app_sub_dir_in(define::path::PERSISTENT_DIR, define::path::EPHEMERAL_DIR)
    }

    /// Same as `create_app_sub_dir` with explicit parents.
    pub fn create_app_sub_dir_in(persistent: &str, ephemeral: &str) -> Result<ViewerPath, ViewerError> {
        let missing = |what: &str| ViewerError::Config(format!("Can't create {what} dir"));
        let data_dir = create_subdir_in_either_dir(persistent, ephemeral, define::system::NAME)
            .ok_or_else(|| missing("data"))?;
        let tmp_dir = create_dir_from_path_list(&[ephemeral, define::system::NAME])
            .ok_or_else(|| missing("tmp"))?;
        let img_dir = create_dir_from_path_list(&[&data_dir, define::path::IMG_DIR])
            .ok_or_else(|| missing("img"))?;
        let log_dir = create_dir_from_path_list(&[&data_dir, define::path::LOG_DIR])
            .ok_or_else(|| missing("log"))?;
        Ok(ViewerPath {
            img: ViewerImg {
                last: super::join(&[&tmp_dir, define::path::LAST_IMAGE]),
            },
            dir: ViewerDir {
                data: data_dir,
                tmp: tmp_dir,
                img: img_dir,
                log: log_dir,
            },
        })
    }
}

/// Paths of Resources
///
/// This struct represents the paths of the resources used by the application.
#[derive(Debug, Clone)]
pub struct ViewerPath {
    /// Directories Paths
    pub dir: ViewerDir,
    /// Images Paths
    pub img: ViewerImg,
}

/// Paths of Directories
#[derive(Debug, Clone)]
pub struct ViewerDir {
    /// Data Directory Path
    pub data: String,
    /// Temporary Directory Path
    pub tmp: String,
    /// Image Directory Path
    pub img: String,
    /// Log Directory Path
    pub log: String,
}

/// Paths of Images
#[derive(Debug, Clone)]
pub struct ViewerImg {
    /// Last Annotated Frame Path
    pub last: String,
}
