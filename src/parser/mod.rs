//! Email parsing: MIME text extraction and header decoding.

pub mod mime;
