//! This module contains all the sub-modules of the project.

pub mod announce; // Announce module: Speaks newly seen object classes with a cooldown.
pub mod console; // Console module: Terminal front end for the viewer.
pub mod define; // Definition module: Contains definitions and constants used throughout the project.
pub mod detect_loop; // Detect loop module: Runs detection on the live camera feed.
pub mod device; // Device module: Manages output devices such as the speaker.
pub mod error; // Error module: Error type shared by all modules.
pub mod util; // Utility module: Provides various utility functions and helpers.
pub mod vision; // Vision module: Handles cameras, object detection and annotation.
