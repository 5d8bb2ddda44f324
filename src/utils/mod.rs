pub(crate) mod bytes;
mod time;
mod utf16;

pub use self::time::FileTime;
pub(crate) use self::utf16::{decode_utf16le_bytes_z, encode_utf16z};
