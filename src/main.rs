//! This module defines the main functionality of Talkcam, a live object detection viewer that
//! speaks what it sees.

pub mod module; // Import the module submodule that contains other modules
use crate::module::define; // Import the define module that contains constants and types
use crate::module::util::init::resource::init; // Import the resource initialization function

use std::error::Error;

// The main function of Talkcam
pub fn main() -> Result<(), Box<dyn Error>> {
    // Prepare the resources by initializing the property struct
    let property = init()?;

    // Initialize the logging system with the data directory and the system name
    init_log(
        property.path.dir.data.as_str(),
        define::system::NAME,
        &property.conf.system.log_level,
    )?;
    log::info!("Starting Talkcam...");

    // The whole viewer lives on one thread, model loading and inference use blocking workers
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();

    let save_path = property
        .conf
        .vision
        .save_annotated
        .then(|| property.path.img.last.clone());

    local.block_on(&runtime, async {
        let (control, handle, rx) = module::detect_loop::launch(&property);
        module::console::run(control, handle, rx, save_path).await;
    });

    log::info!("Talkcam stopped");
    Ok(())
}

/// This function initializes the logger system using the log4rs crate.
///
/// # Arguments
/// * `dir` - A string slice that holds the directory where the log file will be stored
/// * `name` - A string slice that holds the name of the logger and the log file
/// * `level` - Log level name such as "INFO". Unknown names fall back to INFO.
///
/// # Example
/// ```
/// init_log("./log_dir", "logger_name", "INFO"); // Initialize the logger with the given directory and name
/// ```
fn init_log(dir: &str, name: &str, level: &str) -> Result<(), Box<dyn Error>> {
    use crate::module::util::path::join;
    use log::LevelFilter;
    use log4rs::append::file::FileAppender;
    use log4rs::config::{Appender, Config, Root};
    use log4rs::encode::pattern::PatternEncoder;
    use std::str::FromStr;

    let level = LevelFilter::from_str(level).unwrap_or(LevelFilter::Info);

    let logfile = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{h({d} - {l}: {m}{n})}")))
        .build(join(&[dir, define::path::LOG_DIR, &format!("{}.log", name)]))?;

    let config = Config::builder()
        .appender(Appender::builder().build("logfile", Box::new(logfile)))
        .build(Root::builder().appender("logfile").build(level))?;
    log4rs::init_config(config)?;
    Ok(())
}
