pub mod frame;
pub mod gst_util;
pub mod info;
pub mod pipeline;
pub mod probe;
