//! This module is responsible for preparing the resources needed by the application, such as directories, configurations, logs, etc.
//!

pub mod resource {
    use super::ViewerProperty;
    use crate::module::error::ViewerError;

    /// Initialize the application resources and return a ViewerProperty instance containing paths and configurations.
    ///
    pub fn init() -> Result<ViewerProperty, ViewerError> {
        // Prepare the app data directory
        let paths = crate::module::util::path::dir::create_app_sub_dir()?;

        // Load the app configuration file, a default one is written on first run
        let conf = crate::module::util::conf::toml::load(&paths.dir.data)?;

        Ok(ViewerProperty { path: paths, conf })
    }
}

/// This struct represents the properties of the app, such as paths and configurations.
///
#[derive(Debug, Clone)]
pub struct ViewerProperty {
    pub path: crate::module::util::path::ViewerPath, // The paths of the app resources
    pub conf: crate::module::util::conf::Config,     // The configurations of the app
}
