use bytes::Bytes;
use std::fmt;

/// One decoded Quick Block Transfer block.
///
/// A segment is the unit of transmission: products larger than one block
/// arrive as `total_blocks` segments sharing a filename and timestamp, in
/// no particular order and possibly more than once.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Product filename, uppercased.
    pub filename: String,
    /// 1-based position of this block within the product.
    pub block_number: u32,
    /// Number of blocks in the whole product.
    pub total_blocks: u32,
    /// Header-declared checksum: the unsigned sum of the content bytes.
    pub checksum: u32,
    /// Wire timestamp of the broadcast carrying this product.
    pub timestamp: Timestamp,
    /// Which framing carried this block.
    pub version: Version,
    /// On-wire body length in bytes. Equal to `content.len()` for V1;
    /// the pre-inflate length for V2.
    pub declared_length: u32,
    /// Decoded block payload.
    pub content: Bytes,
    /// The relay that sent this block, for diagnostics.
    pub source: String,
}

/// Quick Block Transfer framing version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    /// Fixed 1024-byte plain body.
    V1,
    /// Variable-length deflate-compressed body.
    V2,
}

/// A wire timestamp, transmitted as `M/D/YYYY h:mm:ss AM|PM`.
///
/// Stored in 24-hour form; `Display` re-renders the wire format. Segments
/// are keyed by `(filename, timestamp)` during reassembly, so `Timestamp`
/// is `Eq + Hash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timestamp {
    pub month: u8,
    pub day: u8,
    pub year: u16,
    /// 0..=23
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl Timestamp {
    /// Parse the wire format. Returns `None` for anything else.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split_whitespace();
        let date = parts.next()?;
        let time = parts.next()?;
        let meridiem = parts.next()?;
        if parts.next().is_some() {
            return None;
        }

        let mut date = date.split('/');
        let month: u8 = date.next()?.parse().ok()?;
        let day: u8 = date.next()?.parse().ok()?;
        let year: u16 = date.next()?.parse().ok()?;
        if date.next().is_some() {
            return None;
        }

        let mut time = time.split(':');
        let hour12: u8 = time.next()?.parse().ok()?;
        let minute: u8 = time.next()?.parse().ok()?;
        let second: u8 = time.next()?.parse().ok()?;
        if time.next().is_some() {
            return None;
        }

        if !(1..=12).contains(&month)
            || !(1..=31).contains(&day)
            || !(1..=12).contains(&hour12)
            || minute > 59
            || second > 59
        {
            return None;
        }

        let hour = match (hour12, meridiem) {
            (12, "AM") => 0,
            (h, "AM") => h,
            (12, "PM") => 12,
            (h, "PM") => h + 12,
            _ => return None,
        };

        Some(Timestamp {
            month,
            day,
            year,
            hour,
            minute,
            second,
        })
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (hour12, meridiem) = match self.hour {
            0 => (12, "AM"),
            h @ 1..=11 => (h, "AM"),
            12 => (12, "PM"),
            h => (h - 12, "PM"),
        };
        write!(
            f,
            "{}/{}/{} {}:{:02}:{:02} {}",
            self.month, self.day, self.year, hour12, self.minute, self.second, meridiem
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_format() {
        let ts = Timestamp::parse("6/5/2015 12:56:00 AM").unwrap();
        assert_eq!(
            ts,
            Timestamp {
                month: 6,
                day: 5,
                year: 2015,
                hour: 0,
                minute: 56,
                second: 0,
            }
        );
    }

    #[test]
    fn round_trips_through_display() {
        for text in [
            "6/5/2015 12:56:00 AM",
            "12/31/1999 11:59:59 PM",
            "1/1/2022 12:00:00 PM",
            "2/28/2021 1:05:09 AM",
        ] {
            let ts = Timestamp::parse(text).unwrap();
            assert_eq!(ts.to_string(), text);
        }
    }

    #[test]
    fn meridiem_maps_to_24_hour() {
        assert_eq!(Timestamp::parse("1/1/2020 12:00:00 AM").unwrap().hour, 0);
        assert_eq!(Timestamp::parse("1/1/2020 1:00:00 AM").unwrap().hour, 1);
        assert_eq!(Timestamp::parse("1/1/2020 12:00:00 PM").unwrap().hour, 12);
        assert_eq!(Timestamp::parse("1/1/2020 11:00:00 PM").unwrap().hour, 23);
    }

    #[test]
    fn rejects_garbage() {
        for text in [
            "",
            "6/5/2015",
            "6/5/2015 12:56:00",
            "6/5/2015 12:56:00 XX",
            "13/5/2015 12:56:00 AM",
            "6/5/2015 0:56:00 AM",
            "6/5/2015 12:60:00 AM",
            "six/five/2015 12:56:00 AM",
            "6/5/2015 12:56:00 AM extra",
        ] {
            assert!(Timestamp::parse(text).is_none(), "{:?}", text);
        }
    }
}
