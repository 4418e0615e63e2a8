//! AMF0 value codec
//!
//! RTMP command and data messages carry their arguments as AMF0 values
//! concatenated back to back.

pub mod amf0;
pub mod value;

pub use amf0::{Amf0Decoder, Amf0Encoder};
pub use value::AmfValue;
