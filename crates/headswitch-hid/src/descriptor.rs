//! Minimal HID report descriptor parser.
//!
//! Only what is needed to pick the receiver's control interface: the usage
//! page of each top-level collection and the largest input and output
//! report, in bytes.

use std::collections::BTreeMap;

use crate::error::{HidError, HidResult};

const ITEM_MAIN: u8 = 0;
const ITEM_GLOBAL: u8 = 1;
const ITEM_LOCAL: u8 = 2;

const MAIN_INPUT: u8 = 0x8;
const MAIN_OUTPUT: u8 = 0x9;
const MAIN_COLLECTION: u8 = 0xa;
const MAIN_END_COLLECTION: u8 = 0xc;

const GLOBAL_USAGE_PAGE: u8 = 0x0;
const GLOBAL_REPORT_SIZE: u8 = 0x7;
const GLOBAL_REPORT_ID: u8 = 0x8;
const GLOBAL_REPORT_COUNT: u8 = 0x9;
const GLOBAL_PUSH: u8 = 0xa;
const GLOBAL_POP: u8 = 0xb;

const LOCAL_USAGE: u8 = 0x0;

const LONG_ITEM: u8 = 0xfe;

/// Report layout of one HID interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportCapabilities {
    /// Usage page and usage of each top-level collection, in order
    pub collections: Vec<(u16, u16)>,
    /// Largest input report in bytes, including the report id byte
    pub input_report_length: usize,
    /// Largest output report in bytes, including the report id byte
    pub output_report_length: usize,
}

impl ReportCapabilities {
    /// Usage page of the first top-level collection.
    #[must_use]
    pub fn usage_page(&self) -> Option<u16> {
        self.collections.first().map(|&(page, _)| page)
    }

    /// Whether any top-level collection is on `usage_page`.
    #[must_use]
    pub fn has_usage_page(&self, usage_page: u16) -> bool {
        self.collections.iter().any(|&(page, _)| page == usage_page)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Globals {
    usage_page: u16,
    report_size: u32,
    report_count: u32,
    report_id: u8,
}

/// Parse a report descriptor.
///
/// # Errors
/// Returns an error if an item runs past the end of the descriptor or a Pop
/// has no matching Push.
pub fn parse(descriptor: &[u8]) -> HidResult<ReportCapabilities> {
    let mut globals = Globals::default();
    let mut stack = Vec::new();
    let mut usage: Option<u16> = None;
    let mut depth = 0usize;
    let mut uses_report_ids = false;

    let mut collections = Vec::new();
    let mut input_bits: BTreeMap<u8, u32> = BTreeMap::new();
    let mut output_bits: BTreeMap<u8, u32> = BTreeMap::new();

    let mut pos = 0;
    while pos < descriptor.len() {
        let prefix = descriptor[pos];

        if prefix == LONG_ITEM {
            let size = *descriptor
                .get(pos + 1)
                .ok_or_else(|| truncated(pos))?;
            pos += 3 + usize::from(size);
            if pos > descriptor.len() {
                return Err(truncated(pos));
            }
            continue;
        }

        let size = match prefix & 0x3 {
            3 => 4,
            n => usize::from(n),
        };
        let kind = (prefix >> 2) & 0x3;
        let tag = prefix >> 4;

        let data = descriptor
            .get(pos + 1..pos + 1 + size)
            .ok_or_else(|| truncated(pos))?;
        let value = data
            .iter()
            .rev()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
        pos += 1 + size;

        match (kind, tag) {
            (ITEM_GLOBAL, GLOBAL_USAGE_PAGE) => globals.usage_page = low16(value),
            (ITEM_GLOBAL, GLOBAL_REPORT_SIZE) => globals.report_size = value,
            (ITEM_GLOBAL, GLOBAL_REPORT_COUNT) => globals.report_count = value,
            (ITEM_GLOBAL, GLOBAL_REPORT_ID) => {
                globals.report_id = u8::try_from(value).unwrap_or(u8::MAX);
                uses_report_ids = true;
            }
            (ITEM_GLOBAL, GLOBAL_PUSH) => stack.push(globals),
            (ITEM_GLOBAL, GLOBAL_POP) => {
                globals = stack
                    .pop()
                    .ok_or_else(|| HidError::Descriptor(format!("pop without push at offset {pos}")))?;
            }
            (ITEM_LOCAL, LOCAL_USAGE) => {
                usage.get_or_insert(low16(value));
            }
            (ITEM_MAIN, MAIN_INPUT) => {
                let bits = input_bits.entry(globals.report_id).or_default();
                *bits = bits.saturating_add(globals.report_size.saturating_mul(globals.report_count));
            }
            (ITEM_MAIN, MAIN_OUTPUT) => {
                let bits = output_bits.entry(globals.report_id).or_default();
                *bits = bits.saturating_add(globals.report_size.saturating_mul(globals.report_count));
            }
            (ITEM_MAIN, MAIN_COLLECTION) => {
                if depth == 0 {
                    collections.push((globals.usage_page, usage.unwrap_or(0)));
                }
                depth += 1;
            }
            (ITEM_MAIN, MAIN_END_COLLECTION) => depth = depth.saturating_sub(1),
            _ => {}
        }

        // Local items only apply to the next main item
        if kind == ITEM_MAIN {
            usage = None;
        }
    }

    let id_byte = usize::from(uses_report_ids);
    let longest = |bits: &BTreeMap<u8, u32>| {
        bits.values()
            .map(|&b| usize::try_from(b.div_ceil(8)).unwrap_or(usize::MAX))
            .max()
            .map_or(0, |bytes| bytes + id_byte)
    };

    Ok(ReportCapabilities {
        collections,
        input_report_length: longest(&input_bits),
        output_report_length: longest(&output_bits),
    })
}

fn low16(value: u32) -> u16 {
    let [lo, hi, ..] = value.to_le_bytes();
    u16::from_le_bytes([lo, hi])
}

fn truncated(offset: usize) -> HidError {
    HidError::Descriptor(format!("item truncated at offset {offset}"))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    use super::*;

    /// Vendor collection with 64-byte input and output reports under id 0x51.
    const VENDOR_LONG: &[u8] = &[
        0x06, 0x43, 0xff, // Usage Page (0xff43)
        0x0a, 0x02, 0x02, // Usage (0x0202)
        0xa1, 0x01, //       Collection (Application)
        0x85, 0x51, //         Report ID (0x51)
        0x75, 0x08, //         Report Size (8)
        0x95, 0x3f, //         Report Count (63)
        0x15, 0x00, //         Logical Minimum (0)
        0x26, 0xff, 0x00, //   Logical Maximum (255)
        0x09, 0x01, //         Usage (1)
        0x81, 0x00, //         Input
        0x09, 0x01, //         Usage (1)
        0x91, 0x00, //         Output
        0xc0, //             End Collection
    ];

    #[test]
    fn test_vendor_collection() {
        let caps = parse(VENDOR_LONG).expect("Failed to parse descriptor");
        assert_eq!(caps.collections, vec![(0xff43, 0x0202)]);
        assert_eq!(caps.usage_page(), Some(0xff43));
        assert_eq!(caps.input_report_length, 64);
        assert_eq!(caps.output_report_length, 64);
    }

    #[test]
    fn test_input_only_interface_has_no_output() {
        let descriptor = [
            0x05, 0x0c, //       Usage Page (Consumer)
            0x09, 0x01, //       Usage (Consumer Control)
            0xa1, 0x01, //       Collection (Application)
            0x75, 0x10, //         Report Size (16)
            0x95, 0x02, //         Report Count (2)
            0x81, 0x00, //         Input
            0xc0,
        ];
        let caps = parse(&descriptor).expect("Failed to parse descriptor");
        assert_eq!(caps.usage_page(), Some(0x000c));
        assert_eq!(caps.input_report_length, 4);
        assert_eq!(caps.output_report_length, 0);
        assert!(!caps.has_usage_page(0xff43));
    }

    #[test]
    fn test_largest_report_wins_across_ids() {
        let descriptor = [
            0x06, 0x00, 0xff, // Usage Page (0xff00)
            0x09, 0x01, //       Usage (1)
            0xa1, 0x01, //       Collection
            0x75, 0x08, //         Report Size (8)
            0x85, 0x10, //         Report ID (0x10)
            0x95, 0x06, //         Report Count (6)
            0x91, 0x00, //         Output
            0x85, 0x11, //         Report ID (0x11)
            0x95, 0x13, //         Report Count (19)
            0x91, 0x00, //         Output
            0xc0,
        ];
        let caps = parse(&descriptor).expect("Failed to parse descriptor");
        assert_eq!(caps.output_report_length, 20);
    }

    #[test]
    fn test_push_pop_restores_globals() {
        let descriptor = [
            0x06, 0x43, 0xff, // Usage Page (0xff43)
            0x75, 0x08, //       Report Size (8)
            0x95, 0x08, //       Report Count (8)
            0xa4, //             Push
            0x75, 0x01, //       Report Size (1)
            0x05, 0x01, //       Usage Page (Generic Desktop)
            0xb4, //             Pop
            0xa1, 0x01, //       Collection
            0x91, 0x00, //         Output
            0xc0,
        ];
        let caps = parse(&descriptor).expect("Failed to parse descriptor");
        assert_eq!(caps.usage_page(), Some(0xff43));
        assert_eq!(caps.output_report_length, 8);
    }

    #[test]
    fn test_nested_collections_only_count_top_level() {
        let descriptor = [
            0x05, 0x01, 0x09, 0x02, 0xa1, 0x01, // Mouse application
            0x09, 0x01, 0xa1, 0x00, //             Pointer physical
            0xc0, 0xc0, //
            0x06, 0x43, 0xff, 0x09, 0x01, 0xa1, 0x01, 0xc0, // Vendor
        ];
        let caps = parse(&descriptor).expect("Failed to parse descriptor");
        assert_eq!(caps.collections, vec![(0x0001, 0x0002), (0xff43, 0x0001)]);
        assert!(caps.has_usage_page(0xff43));
    }

    #[test]
    fn test_long_items_skipped() {
        let mut descriptor = vec![0xfe, 0x02, 0x10, 0xaa, 0xbb];
        descriptor.extend_from_slice(VENDOR_LONG);
        let caps = parse(&descriptor).expect("Failed to parse descriptor");
        assert_eq!(caps.output_report_length, 64);
    }

    #[test]
    fn test_truncated_item() {
        assert_matches!(parse(&[0x06, 0x43]), Err(HidError::Descriptor(_)));
        assert_matches!(parse(&[0xfe, 0x05, 0x00]), Err(HidError::Descriptor(_)));
    }

    #[test]
    fn test_pop_without_push() {
        assert_matches!(parse(&[0xb4]), Err(HidError::Descriptor(_)));
    }

    #[test]
    fn test_empty_descriptor() {
        let caps = parse(&[]).expect("Failed to parse descriptor");
        assert_eq!(caps, ReportCapabilities::default());
    }

    proptest! {
        #[test]
        fn test_arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            if let Ok(caps) = parse(&bytes) {
                prop_assert!(caps.collections.len() <= bytes.len());
            }
        }

        #[test]
        fn test_truncated_descriptor_never_panics(cut in 0..VENDOR_LONG.len()) {
            let _ = parse(&VENDOR_LONG[..cut]);
        }
    }
}
