//! Unit tests for the binary cache write/read cycle
//!
//! Covers byte-identical round trips, partial-file rejection and
//! payload corruption detection.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};

use tempfile::tempdir;

use seqfeed_core::cache::reader::CacheReader;
use seqfeed_core::cache::writer::CacheWriter;
use seqfeed_core::corpus::sequence::{ArraySpec, DType, NdArray};
use seqfeed_core::error::FeedError;

fn specs() -> Vec<ArraySpec> {
    vec![
        ArraySpec::new("features", DType::F32, vec![2]),
        ArraySpec::new("labels", DType::I32, vec![]),
    ]
}

fn sequence(len: usize, salt: f32) -> HashMap<String, NdArray> {
    let features: Vec<f32> = (0..len * 2).map(|i| i as f32 + salt).collect();
    let labels: Vec<i32> = (0..len).map(|i| i as i32 * 3).collect();
    let mut arrays = HashMap::new();
    arrays.insert(
        "features".to_string(),
        NdArray::from_f32(vec![len, 2], &features).unwrap(),
    );
    arrays.insert(
        "labels".to_string(),
        NdArray::from_i32(vec![len], &labels).unwrap(),
    );
    arrays
}

#[test]
fn test_round_trip_is_byte_identical() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("corpus.sqfc");

    let originals: Vec<HashMap<String, NdArray>> =
        vec![sequence(3, 0.5), sequence(1, 10.0), sequence(7, -2.0)];

    let mut writer = CacheWriter::begin_write(&path, specs()).unwrap();
    for (i, arrays) in originals.iter().enumerate() {
        let tag = format!("utt-{}", i);
        let id = writer.append_sequence(arrays, Some(&tag)).unwrap();
        assert_eq!(id, i as u64);
    }
    writer.finalize_write().unwrap();

    let reader = CacheReader::open_read(&path).unwrap();
    assert_eq!(reader.len(), 3);
    assert_eq!(reader.array_specs(), specs().as_slice());

    for (i, original) in originals.iter().enumerate() {
        let id = i as u64;
        assert_eq!(
            reader.sequence_length(id).unwrap(),
            original["labels"].time_len()
        );
        assert_eq!(reader.tag(id).unwrap(), Some(format!("utt-{}", i).as_str()));

        let restored = reader.read_sequence(id).unwrap();
        assert_eq!(restored.id, id);
        for key in ["features", "labels"] {
            let a = &original[key];
            let b = restored.array(key).unwrap();
            assert_eq!(a.shape(), b.shape());
            assert_eq!(a.data(), b.data(), "payload for '{}' must round-trip", key);
        }
    }
}

#[test]
fn test_unfinalized_file_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("partial.sqfc");

    let mut writer = CacheWriter::begin_write(&path, specs()).unwrap();
    writer.append_sequence(&sequence(4, 0.0), None).unwrap();
    drop(writer); // no finalize_write

    assert!(matches!(
        CacheReader::open_read(&path),
        Err(FeedError::CorruptCache { .. })
    ));
}

#[test]
fn test_truncated_file_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("truncated.sqfc");

    let mut writer = CacheWriter::begin_write(&path, specs()).unwrap();
    writer.append_sequence(&sequence(4, 0.0), None).unwrap();
    writer.finalize_write().unwrap();

    let full_len = std::fs::metadata(&path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(full_len - 10).unwrap();

    assert!(matches!(
        CacheReader::open_read(&path),
        Err(FeedError::CorruptCache { .. })
    ));
}

#[test]
fn test_payload_corruption_is_detected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("flipped.sqfc");

    let mut writer = CacheWriter::begin_write(&path, specs()).unwrap();
    writer.append_sequence(&sequence(4, 1.0), None).unwrap();
    writer.append_sequence(&sequence(2, 2.0), None).unwrap();
    writer.finalize_write().unwrap();

    // Flip one byte inside the second sequence's payload. The index
    // (and thus open) stays intact; only that sequence's CRC fails.
    let second_offset = {
        let reader = CacheReader::open_read(&path).unwrap();
        reader.data_bytes() - 4 // tail of the second sequence's block
    };
    let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(second_offset)).unwrap();
    let mut byte = [0u8; 1];
    file.read_exact(&mut byte).unwrap();
    file.seek(SeekFrom::Start(second_offset)).unwrap();
    file.write_all(&[byte[0] ^ 0xFF]).unwrap();
    file.sync_all().unwrap();

    let reader = CacheReader::open_read(&path).unwrap();
    assert!(reader.read_sequence(0).is_ok());
    assert!(matches!(
        reader.read_sequence(1),
        Err(FeedError::CorruptCache { .. })
    ));
}

#[test]
fn test_index_without_specs_is_rejected() {
    use seqfeed_core::cache::format::{self, CacheIndex, Footer};

    let dir = tempdir().unwrap();
    let path = dir.path().join("specless.sqfc");

    // A well-formed file whose index declares no arrays: valid footer,
    // valid checksum, nothing to describe a sequence with.
    let index = CacheIndex::new(Vec::new());
    let index_json = serde_json::to_vec(&index).unwrap();
    let footer = Footer {
        index_offset: 0,
        index_len: index_json.len() as u64,
        index_crc32c: crc32c::crc32c(&index_json),
        version: index.version,
    };
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(&index_json).unwrap();
    file.write_all(&format::encode_footer(&footer)).unwrap();
    file.sync_all().unwrap();

    assert!(matches!(
        CacheReader::open_read(&path),
        Err(FeedError::CorruptCache { .. })
    ));
}

#[test]
fn test_unknown_id_is_data_unavailable() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("small.sqfc");

    let mut writer = CacheWriter::begin_write(&path, specs()).unwrap();
    writer.append_sequence(&sequence(2, 0.0), None).unwrap();
    writer.finalize_write().unwrap();

    let reader = CacheReader::open_read(&path).unwrap();
    assert!(matches!(
        reader.read_sequence(5),
        Err(FeedError::DataUnavailable { seq_id: 5, .. })
    ));
}
