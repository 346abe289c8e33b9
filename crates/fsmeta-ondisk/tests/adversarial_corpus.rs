#![forbid(unsafe_code)]

use fsmeta_ondisk::{
    ClusterChain, ExfatUtcOffset, FatBootSector, FatDirEntry, FatWidth, decode_run_list,
    dump_boot_fields, iter_root_dir,
};
use fsmeta_types::ParseError;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

#[derive(Debug, Default)]
struct ErrorCoverage {
    out_of_range: u32,
    malformed_record: u32,
    invalid_geometry: u32,
    broken_chain: u32,
    cycle_detected: u32,
    truncated_run_list: u32,
    invalid_field: u32,
    integer_conversion: u32,
}

impl ErrorCoverage {
    fn observe(&mut self, err: &ParseError) {
        match err {
            ParseError::OutOfRange { .. } => self.out_of_range += 1,
            ParseError::MalformedRecord { .. } => self.malformed_record += 1,
            ParseError::InvalidGeometry { .. } => self.invalid_geometry += 1,
            ParseError::BrokenChain { .. } => self.broken_chain += 1,
            ParseError::CycleDetected { .. } => self.cycle_detected += 1,
            ParseError::TruncatedRunList { .. } => self.truncated_run_list += 1,
            ParseError::InvalidField { .. } => self.invalid_field += 1,
            ParseError::IntegerConversion { .. } => self.integer_conversion += 1,
        }
    }
}

/// Deterministic xorshift64 so the corpus is identical on every run.
struct Corpus {
    state: u64,
}

impl Corpus {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn sample(&mut self, max_len: usize) -> Vec<u8> {
        let len = usize::try_from(self.next_u64() % (max_len as u64 + 1)).expect("len");
        (0..len).map(|_| self.next_u64().to_le_bytes()[0]).collect()
    }
}

fn samples() -> Vec<(String, Vec<u8>)> {
    let mut corpus = Corpus::new(0x5EED_F00D_CAFE_BEEF);
    let mut out: Vec<(String, Vec<u8>)> = vec![
        ("empty".into(), Vec::new()),
        ("single_zero".into(), vec![0]),
        ("all_ff_64".into(), vec![0xFF; 64]),
        ("all_zero_512".into(), vec![0; 512]),
        ("run_header_only".into(), vec![0x44]),
        ("fat_self_loop".into(), vec![0xF8, 0xFF, 0xFF, 0xFF, 0x02, 0x00]),
        ("wide_run_length".into(), [vec![0x0F], vec![0xAB; 15]].concat()),
    ];
    for i in 0..96 {
        out.push((format!("random_{i:03}"), corpus.sample(600)));
    }
    out
}

fn run_parser<T, F>(
    sample_name: &str,
    parser_name: &'static str,
    parser_hits: &mut BTreeMap<&'static str, u32>,
    coverage: &mut ErrorCoverage,
    parser: F,
) where
    F: FnOnce() -> Result<T, ParseError>,
{
    *parser_hits.entry(parser_name).or_default() += 1;
    match catch_unwind(AssertUnwindSafe(parser)) {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => coverage.observe(&err),
        Err(_) => panic!("parser `{parser_name}` panicked on sample `{sample_name}`"),
    }
}

fn walk_root_dir(region: &[u8]) -> Result<usize, ParseError> {
    let mut count = 0;
    for entry in iter_root_dir(region) {
        entry?;
        count += 1;
    }
    Ok(count)
}

#[test]
fn adversarial_corpus_is_panic_free() {
    let samples = samples();
    let mut parser_hits = BTreeMap::new();
    let mut coverage = ErrorCoverage::default();

    for (name, bytes) in &samples {
        run_parser(
            name,
            "fat_boot_sector_geometry",
            &mut parser_hits,
            &mut coverage,
            || FatBootSector::parse(bytes)?.geometry(),
        );
        run_parser(
            name,
            "fat_dump_boot_fields",
            &mut parser_hits,
            &mut coverage,
            || dump_boot_fields(bytes),
        );
        run_parser(
            name,
            "fat_dir_entry_prefix",
            &mut parser_hits,
            &mut coverage,
            || FatDirEntry::parse(&bytes[..bytes.len().min(32)]),
        );
        run_parser(
            name,
            "fat_root_dir",
            &mut parser_hits,
            &mut coverage,
            || walk_root_dir(bytes),
        );
        for start in [0_u16, 2, 5, 0xFFFF] {
            run_parser(
                name,
                "fat16_chain",
                &mut parser_hits,
                &mut coverage,
                || ClusterChain::new(bytes, start).collect_clusters(),
            );
            run_parser(
                name,
                "fat12_chain",
                &mut parser_hits,
                &mut coverage,
                || ClusterChain::with_width(bytes, start, FatWidth::Fat12).collect_clusters(),
            );
        }
        run_parser(
            name,
            "ntfs_run_list",
            &mut parser_hits,
            &mut coverage,
            || decode_run_list(bytes, 0),
        );
        if let Some(&first) = bytes.first() {
            let offset = ExfatUtcOffset::from_byte(first);
            assert!((-960..=945).contains(&offset.minutes()));
        }
    }

    for (parser, hits) in &parser_hits {
        assert!(*hits > 0, "parser `{parser}` was never exercised");
    }
    assert!(coverage.out_of_range > 0, "{coverage:?}");
    assert!(coverage.malformed_record > 0, "{coverage:?}");
    assert!(coverage.broken_chain > 0, "{coverage:?}");
    assert!(coverage.cycle_detected > 0, "{coverage:?}");
    assert!(coverage.invalid_field > 0, "{coverage:?}");
}

#[test]
fn every_truncation_of_a_boot_sector_is_an_error_not_a_panic() {
    let mut bs = vec![0_u8; 512];
    bs[0x0B..0x0D].copy_from_slice(&512_u16.to_le_bytes());
    bs[0x0D] = 1;
    bs[0x0E..0x10].copy_from_slice(&1_u16.to_le_bytes());
    bs[0x10] = 2;
    bs[0x11..0x13].copy_from_slice(&16_u16.to_le_bytes());
    bs[0x16..0x18].copy_from_slice(&1_u16.to_le_bytes());

    for len in 0..36 {
        assert!(
            matches!(
                FatBootSector::parse(&bs[..len]),
                Err(ParseError::OutOfRange { .. })
            ),
            "len {len}"
        );
    }
    assert!(FatBootSector::parse(&bs[..36]).is_ok());
}

#[test]
fn every_truncation_of_a_run_list_is_reported() {
    let full = [
        0x21, 0x03, 0xDA, 0x0D, 0x21, 0x01, 0x4A, 0xF2, 0x31, 0x05, 0x65, 0xF3, 0x03,
    ];
    for len in 0..full.len() {
        let result = decode_run_list(&full[..len], 0);
        // Cuts that fall exactly on a run boundary decode the complete prefix.
        match len {
            0 | 4 | 8 => assert!(result.is_ok(), "len {len}"),
            _ => assert!(
                matches!(result, Err(ParseError::TruncatedRunList { .. })),
                "len {len}"
            ),
        }
    }
    assert_eq!(decode_run_list(&full, 0).expect("full").runs.len(), 3);
}
