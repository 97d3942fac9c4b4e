// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use serde::Serialize;

/// Longest run emitted as a single string; longer runs are flushed in
/// chunks.
pub const MAX_RUN: usize = 1023;

pub const MIN_LEN_DEFAULT: usize = 4;
pub const MIN_LEN_LIMIT: usize = 1024;

/// A printable-string hit at a byte offset.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct StringHit {
    #[serde(serialize_with = "crate::se::lower_hex08")]
    pub offset: u64,
    pub value: String,
}

fn is_printable(byte: u8) -> bool {
    byte.is_ascii_graphic() || byte == b' ' || byte == b'\t' || byte == b'\n'
}

/// Extract runs of printable bytes of at least `min_len` characters.
pub fn extract(data: &[u8], min_len: usize) -> Vec<StringHit> {
    let mut hits = vec![];

    let mut run = String::new();
    let mut offset = 0u64;

    for (i, &byte) in data.iter().enumerate() {
        if is_printable(byte) {
            if run.is_empty() {
                offset = i as u64;
            }

            run.push(byte as char);

            if run.len() >= MAX_RUN {
                hits.push(StringHit {
                    offset,
                    value: std::mem::take(&mut run),
                });
            }
        } else if !run.is_empty() {
            if run.len() >= min_len {
                hits.push(StringHit {
                    offset,
                    value: std::mem::take(&mut run),
                });
            } else {
                run.clear();
            }
        }
    }

    if run.len() >= min_len {
        hits.push(StringHit { offset, value: run });
    }

    hits
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_extracts_runs_with_offsets() {
        let data = b"\x00\x01hello\x00\xffworld!\x00";
        let hits = extract(data, 4);

        assert_eq!(
            hits,
            vec![
                StringHit {
                    offset: 2,
                    value: "hello".into()
                },
                StringHit {
                    offset: 9,
                    value: "world!".into()
                },
            ]
        );
    }

    #[test]
    fn test_min_len_filters_short_runs() {
        let data = b"ab\x00abcd\x00abc";

        assert_eq!(extract(data, 4).len(), 1);
        assert_eq!(extract(data, 3).len(), 2);
        assert_eq!(extract(data, 2).len(), 3);
    }

    #[test]
    fn test_tabs_and_newlines_are_printable() {
        let data = b"\x00a\tb\nc\x00";
        let hits = extract(data, 4);

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].value, "a\tb\nc");
    }

    #[test]
    fn test_trailing_run_is_emitted() {
        let hits = extract(b"\x00tail", 4);

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].offset, 1);
        assert_eq!(hits[0].value, "tail");
    }

    #[test]
    fn test_long_run_is_flushed_in_chunks() {
        let data = vec![b'A'; MAX_RUN + 10];
        let hits = extract(&data, 4);

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].value.len(), MAX_RUN);
        assert_eq!(hits[0].offset, 0);
        assert_eq!(hits[1].value.len(), 10);
        assert_eq!(hits[1].offset, MAX_RUN as u64);
    }

    #[test]
    fn test_offset_serializes_as_hex() {
        let hit = StringHit {
            offset: 0x1a2b,
            value: "x".into(),
        };

        let json = serde_json::to_value(&hit).unwrap();
        assert_eq!(json["offset"], "0x00001a2b");
        assert_eq!(json["value"], "x");
    }
}
