use std::fmt;

use jiff::Timestamp;
use serde::{Serialize, Serializer};

use crate::err::WecError;

const WINDOWS_TO_UNIX_SECS: i64 = 11_644_473_600;
const TICKS_PER_SECOND: u64 = 10_000_000;

/// A Windows `FILETIME`: 100-nanosecond intervals since 1601-01-01T00:00:00Z.
///
/// The raw tick count is kept so values read from the collector can be written back unchanged.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileTime(u64);

impl FileTime {
    /// The zero `FILETIME`. The collector reports this when a time was never recorded.
    pub const EPOCH: FileTime = FileTime(0);

    pub const fn from_raw(ticks: u64) -> Self {
        FileTime(ticks)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub fn is_epoch(self) -> bool {
        self.0 == 0
    }

    pub fn to_timestamp(self) -> Result<Timestamp, WecError> {
        let secs = (self.0 / TICKS_PER_SECOND) as i64 - WINDOWS_TO_UNIX_SECS;
        let nanos = ((self.0 % TICKS_PER_SECOND) * 100) as i32;
        Timestamp::new(secs, nanos).map_err(|_| WecError::InvalidFileTime { raw: self.0 })
    }

    /// Converts a timestamp, truncating to 100ns precision.
    ///
    /// Returns `None` for instants before 1601-01-01.
    pub fn from_timestamp(ts: Timestamp) -> Option<Self> {
        let mut secs = ts.as_second().checked_add(WINDOWS_TO_UNIX_SECS)?;
        // jiff truncates toward zero, so instants before 1970 carry a negative fraction.
        let mut sub = ts.subsec_nanosecond();
        if sub < 0 {
            sub += 1_000_000_000;
            secs -= 1;
        }
        let secs = u64::try_from(secs).ok()?;
        let ticks = secs
            .checked_mul(TICKS_PER_SECOND)?
            .checked_add(sub as u64 / 100)?;
        Some(FileTime(ticks))
    }
}

impl fmt::Display for FileTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_timestamp() {
            Ok(ts) => write!(f, "{}", ts),
            Err(_) => write!(f, "FILETIME({})", self.0),
        }
    }
}

impl Serialize for FileTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_epoch_is_1601() {
        let ts = FileTime::EPOCH.to_timestamp().unwrap();
        assert_eq!(ts.to_string(), "1601-01-01T00:00:00Z");
    }

    #[test]
    fn test_unix_epoch() {
        let ft = FileTime::from_raw(116_444_736_000_000_000);
        assert_eq!(ft.to_timestamp().unwrap(), Timestamp::UNIX_EPOCH);
        assert_eq!(FileTime::from_timestamp(Timestamp::UNIX_EPOCH), Some(ft));
    }

    #[test]
    fn test_timestamp_round_trip_keeps_ticks() {
        let ft = FileTime::from_raw(133_000_000_001_234_567);
        let ts = ft.to_timestamp().unwrap();
        assert_eq!(FileTime::from_timestamp(ts), Some(ft));
    }

    #[test]
    fn test_out_of_range_values_are_errors() {
        assert!(FileTime::from_raw(u64::MAX).to_timestamp().is_err());
        assert_eq!(FileTime::from_raw(u64::MAX).to_string(), format!("FILETIME({})", u64::MAX));
    }

    #[test]
    fn test_serializes_as_rfc3339() {
        let json = serde_json::to_string(&FileTime::EPOCH).unwrap();
        assert_eq!(json, "\"1601-01-01T00:00:00Z\"");
    }
}
