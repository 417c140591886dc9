use std::fmt::Write;

/// One parameter of the peer's initial SETTINGS frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Setting {
    pub id: u16,
    pub value: u32,
}

/// One PRIORITY frame received before the first HEADERS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub stream_id: u32,
    pub exclusive: bool,
    pub dependent_stream: u32,
    /// Raw wire weight; the serialized form adds one (RFC 7540 §5.3.2)
    pub weight: u8,
}

/// One decoded field of the first HEADERS frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
}

/// Frames observed on an HTTP/2 connection before (and including) the first
/// HEADERS frame. Describes only the first request; later frames never
/// mutate the record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Http2FingerprintingFrames {
    /// SETTINGS parameters in transmission order
    pub settings: Vec<Setting>,
    /// First connection-level WINDOW_UPDATE increment, 0 when absent
    pub window_update_increment: u32,
    /// PRIORITY frames in arrival order
    pub priorities: Vec<Priority>,
    /// Decoded fields of the first HEADERS frame, in order
    pub headers: Vec<HeaderField>,
}

impl Http2FingerprintingFrames {
    /// Serializes the record in the Akamai `S[;]|WU|P[,]|PS[,]` form.
    ///
    /// At most `max_priority_frames` PRIORITY entries are emitted.
    pub fn serialize(&self, max_priority_frames: usize) -> String {
        let mut out = String::new();

        for (i, s) in self.settings.iter().enumerate() {
            if i != 0 {
                out.push(';');
            }
            let _ = write!(out, "{}:{}", s.id, s.value);
        }

        // WINDOW_UPDATE: at least two digits, "00" when absent
        let _ = write!(out, "|{:02}|", self.window_update_increment);

        let count = self.priorities.len().min(max_priority_frames);
        if count == 0 {
            out.push('0');
        } else {
            for (i, p) in self.priorities[..count].iter().enumerate() {
                if i != 0 {
                    out.push(',');
                }
                let _ = write!(
                    out,
                    "{}:{}:{}:{}",
                    p.stream_id,
                    u8::from(p.exclusive),
                    p.dependent_stream,
                    u16::from(p.weight) + 1
                );
            }
        }
        out.push('|');

        let mut wrote_pseudo = false;
        for h in &self.headers {
            // only pseudo headers contribute, one letter each
            if let Some(rest) = h.name.strip_prefix(':') {
                if let Some(c) = rest.chars().next() {
                    if wrote_pseudo {
                        out.push(',');
                    }
                    wrote_pseudo = true;
                    out.push(c);
                }
            }
        }

        out
    }
}
