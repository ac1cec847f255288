//! Wire codecs (C1, §4.1): the newline-delimited JSON control framer, the
//! binary media header, and the parameter-set blob.

pub mod control;
pub mod media_header;
pub mod param_sets;

pub use control::{ControlMessage, LineFramer};
pub use media_header::{MediaHeader, HAS_PARAM_SET, KEYFRAME, MEDIA_HEADER_LEN};
pub use param_sets::ParamSets;
