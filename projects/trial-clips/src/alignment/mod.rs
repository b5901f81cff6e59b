// Timestamp alignment between the trial recorder and the camera frame logs

pub mod frame_log;
pub mod locator;
pub mod nearest;
pub mod session;
pub mod timestamp;
pub mod trials;
