//! Integration tests for the complete search flow

use crossbeam_channel::{bounded, unbounded};
use onion_exp_vanity::{
    CpuBackend, Error, ExponentRange, FoundKey, MessageBuffer, PatchMode, SearchConfig, SearchKey,
    TargetSet, TrialDriver,
};
use std::sync::Arc;

/// 1024-bit RSA public key with exponent 0x010001
const SAMPLE_DER_HEX: &str = concat!(
    "30818902818100d5b96fc5708e5de357d07eea3c059dd09cd1b8ece2cfbcdcaf",
    "98377af4b2ae55cbdaf2941b8ee5518625f1d7fab455f5c0a325b9a314dddfdf",
    "a956d5899b4e4227bb3814c0407216276d859926e8c6035c503dd9142d27e71a",
    "4c065a4dec07748f41119d6997152b839d302e152b416f5ae165251541071795",
    "d3f0f52781b1270203010001",
);

fn sample_der() -> Vec<u8> {
    hex::decode(SAMPLE_DER_HEX).unwrap()
}

fn config(patterns: &[&str], min: u64, max: u64) -> SearchConfig {
    let mut config = SearchConfig::new(
        MessageBuffer::from_der(&sample_der()),
        patterns.iter().map(|p| p.to_string()).collect(),
    );
    config.range = ExponentRange::new(min, max).unwrap();
    config
}

fn run(config: SearchConfig) -> (Result<(), Error>, Vec<FoundKey>) {
    let (progress_tx, _progress_rx) = unbounded();
    let (result_tx, result_rx) = unbounded();
    let (_stop_tx, stop_rx) = bounded(1);
    let outcome = CpuBackend::with_threads(2).generate(config, progress_tx, result_tx, stop_rx);
    (outcome, result_rx.try_iter().collect())
}

#[test]
fn test_finds_the_key_own_exponent() {
    let (outcome, found) = run(config(&["2xq4"], 0x10001, 0x10001));
    outcome.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].exponent, 0x10001);
    assert_eq!(found[0].identifier.as_str(), "2xq4uykvzctcayhh");
    assert_eq!(found[0].der, sample_der());
}

#[test]
fn test_finds_later_exponent() {
    let (outcome, found) = run(config(&["l2otpajawsaazlwf"], 0x10001, 0x1000d));
    outcome.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].exponent, 0x1000d);
    assert_eq!(found[0].onion_address(), "l2otpajawsaazlwf.onion");
}

#[test]
fn test_block_words_with_random_start() {
    let mut config = config(&["l2ot[op]"], 0x10001, 0x1000d);
    config.mode = PatchMode::BlockWords;
    config.random_start = true;
    let (outcome, found) = run(config);
    outcome.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].exponent, 0x1000d);
    assert_eq!(found[0].pattern, "l2ot[op]");
}

#[test]
fn test_grown_exponent_end_to_end() {
    let (outcome, found) = run(config(&["ieqe6blpnd34jw3i"], 0x7fff_ffff, 0x7fff_ffff));
    outcome.unwrap();
    assert_eq!(found.len(), 1);
    let der = &found[0].der;
    assert_eq!(der.len(), 141);
    assert_eq!(der[2], 0x8a);
    assert_eq!(&der[136..], &[0x04, 0x7f, 0xff, 0xff, 0xff]);
}

#[test]
fn test_several_patterns() {
    let (outcome, mut found) = run(config(&["2xq4", "l2ot"], 0x10001, 0x1000d));
    outcome.unwrap();
    found.sort_by_key(|f| f.exponent);
    let exponents: Vec<u64> = found.iter().map(|f| f.exponent).collect();
    assert_eq!(exponents, vec![0x10001, 0x1000d]);
}

#[test]
fn test_exhausted_range_finds_nothing() {
    let (outcome, found) = run(config(&["aaaaaaaaaaaaaaaa"], 0x10001, 0x10401));
    outcome.unwrap();
    assert!(found.is_empty());
}

#[test]
fn test_stop_signal() {
    let (progress_tx, _progress_rx) = unbounded();
    let (result_tx, _result_rx) = unbounded();
    let (stop_tx, stop_rx) = bounded(1);
    stop_tx.send(()).unwrap();

    let outcome = CpuBackend::with_threads(1).generate(
        config(&["aaaaaaaaaaaaaaaa"], 0x10001, 0xFF_FFFF_FFFF),
        progress_tx,
        result_tx,
        stop_rx,
    );
    assert_eq!(outcome, Err(Error::Stopped));
}

#[test]
fn test_invalid_input_is_reported() {
    let (outcome, _) = run(config(&["not-base32"], 0x10001, 0x10001));
    assert!(matches!(outcome, Err(Error::InvalidPattern(_))));

    let mut bad = config(&["aa"], 0x10001, 0x10001);
    bad.key = MessageBuffer::from_der(&[0x31, 0x00]);
    let (outcome, _) = run(bad);
    assert!(matches!(outcome, Err(Error::MalformedInput(_))));
}

#[test]
fn test_wide_exponent_key_reports_minimal_der() {
    // same modulus, exponent 0x0100000001 in a five-byte field
    let mut wide = sample_der();
    wide[2] += 2;
    wide.truncate(136);
    wide.extend_from_slice(&[0x05, 0x01, 0x00, 0x00, 0x00, 0x01]);

    let mut config = config(&["2xq4uykvzctcayhh"], 0x10001, 0x10001);
    config.key = MessageBuffer::from_der(&wide);
    let (outcome, found) = run(config);
    outcome.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].der, sample_der());
}

#[test]
fn test_unusable_lengths_are_skipped() {
    // short-form SEQUENCE of 0x7e bytes: the exponent can grow to two bytes, not three
    let mut der = vec![0x30, 0x7e, 0x02, 0x79];
    der.extend(std::iter::repeat(0x22).take(0x79));
    der.extend_from_slice(&[0x02, 0x01, 0x03]);

    let mut config = config(&["thin3ksguwafwqgb"], 3, 0xFFFF);
    config.key = MessageBuffer::from_der(&der);

    let (progress_tx, progress_rx) = unbounded();
    let (result_tx, result_rx) = unbounded();
    let (_stop_tx, stop_rx) = bounded(1);
    let outcome = CpuBackend::with_threads(2).generate(config, progress_tx, result_tx, stop_rx);
    outcome.unwrap();

    let found: Vec<FoundKey> = result_rx.try_iter().collect();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].exponent, 0x1235);
    assert_eq!(found[0].der[1], 0x7f);
    assert_eq!(&found[0].der[found[0].der.len() - 4..], &[0x02, 0x02, 0x12, 0x35]);

    let last = progress_rx.try_iter().last().unwrap();
    assert_eq!(last.keys_checked, 0x7fff);
    // every three-byte exponent, 0x8000..=0xffff
    assert_eq!(last.keys_rejected, 0x4000);
}

#[test]
fn test_search_key_shared_across_threads() {
    let key = Arc::new(SearchKey::new(&sample_der(), 0xFF_FFFF_FFFF).unwrap());
    let targets = Arc::new(TargetSet::parse(&["4sn77"]).unwrap());

    let handles: Vec<_> = [0x8000_0000u64, 0x7fff_ffff, 0x01_0001, 0x01_000d]
        .into_iter()
        .map(|exponent| {
            let key = Arc::clone(&key);
            let targets = Arc::clone(&targets);
            std::thread::spawn(move || {
                let mut driver = TrialDriver::with_mode(&key, PatchMode::BlockWords);
                driver.run(exponent, &targets).unwrap()
            })
        })
        .collect();

    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let ids: Vec<&str> = outcomes.iter().map(|o| o.identifier.as_str()).collect();
    assert_eq!(
        ids,
        vec!["4sn77hajbaump2n7", "ieqe6blpnd34jw3i", "2xq4uykvzctcayhh", "l2otpajawsaazlwf"]
    );
    assert_eq!(outcomes[0].matched, Some(0));
    assert!(outcomes[1..].iter().all(|o| !o.is_match()));
}
