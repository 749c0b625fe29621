pub mod playback;
pub mod session;
pub mod timeline;
