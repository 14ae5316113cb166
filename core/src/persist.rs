//! Versioned, checksummed on-disk index format.
//!
//! Layout: `"NSIX"`, `u32 LE` version, then one frame per section in fixed
//! order. Each frame is `[u64 LE length][u32 LE CRC32][bincode payload]`.
//! Version 2 carries documents, idf, doc_vectors and doc_norms. Version 1
//! lacks doc_norms; decoding it recomputes them via [`migrate_v1_to_v2`].

use crate::error::{Error, Result, Section};
use crate::index::{vector_norm, DocId, Document, Index, TermVector};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub const MAGIC: &[u8; 4] = b"NSIX";
pub const FORMAT_VERSION: u32 = 2;
pub const LEGACY_VERSION_V1: u32 = 1;

const HEADER_LEN: usize = 8;
const FRAME_HEADER_LEN: usize = 12;

type IdfTable = BTreeMap<String, f64>;
type DocVectors = BTreeMap<DocId, TermVector>;
type DocNorms = BTreeMap<DocId, f64>;

/// Encode an index into the current format version. Only current-version
/// indexes are accepted, so `decode(encode(i)) == i` holds field for field.
pub fn encode(index: &Index) -> Result<Vec<u8>> {
    if index.version != FORMAT_VERSION {
        return Err(Error::UnsupportedVersion { found: index.version, supported: FORMAT_VERSION });
    }
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    write_section(&mut out, Section::Documents, &index.documents)?;
    write_section(&mut out, Section::Idf, &index.idf)?;
    write_section(&mut out, Section::DocVectors, &index.doc_vectors)?;
    write_section(&mut out, Section::DocNorms, &index.doc_norms)?;
    Ok(out)
}

/// Encode using the legacy v1 layout (no doc_norms section).
pub fn encode_v1(index: &Index) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&LEGACY_VERSION_V1.to_le_bytes());
    write_section(&mut out, Section::Documents, &index.documents)?;
    write_section(&mut out, Section::Idf, &index.idf)?;
    write_section(&mut out, Section::DocVectors, &index.doc_vectors)?;
    Ok(out)
}

/// Decode an index. All-or-nothing: every frame is length- and CRC-checked
/// before any payload is deserialized.
pub fn decode(bytes: &[u8]) -> Result<Index> {
    let (version, sections) = read_header(bytes)?;
    let mut cursor = HEADER_LEN;
    let mut payloads = Vec::with_capacity(sections.len());
    for &section in sections {
        let (payload, next) = read_frame(bytes, cursor, section)?;
        payloads.push(payload);
        cursor = next;
    }
    if cursor != bytes.len() {
        return Err(Error::corrupt(Section::Trailer, format!("{} unexpected trailing bytes", bytes.len() - cursor)));
    }

    let documents: Vec<Document> = deserialize_section(payloads[0], Section::Documents)?;
    let idf: IdfTable = deserialize_section(payloads[1], Section::Idf)?;
    let doc_vectors: DocVectors = deserialize_section(payloads[2], Section::DocVectors)?;

    let index = if version == LEGACY_VERSION_V1 {
        migrate_v1_to_v2(documents, idf, doc_vectors)
    } else {
        let doc_norms: DocNorms = deserialize_section(payloads[3], Section::DocNorms)?;
        Index { version, documents, idf, doc_vectors, doc_norms }
    };
    validate(&index)?;
    Ok(index)
}

/// v1 -> v2: norms were not persisted, derive them from the stored vectors.
pub fn migrate_v1_to_v2(documents: Vec<Document>, idf: IdfTable, doc_vectors: DocVectors) -> Index {
    let doc_norms = doc_vectors.iter().map(|(id, v)| (id.clone(), vector_norm(v))).collect();
    tracing::info!(from = LEGACY_VERSION_V1, to = FORMAT_VERSION, "migrated legacy index");
    Index { version: FORMAT_VERSION, documents, idf, doc_vectors, doc_norms }
}

/// Write the encoded index to `path` atomically (temp file + rename).
pub fn save_index(path: &Path, index: &Index) -> Result<()> {
    let bytes = encode(index)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    {
        let mut f = File::create(&tmp)?;
        f.write_all(&bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    tracing::info!(path = %path.display(), bytes = bytes.len(), num_docs = index.num_docs(), "saved index");
    Ok(())
}

pub fn load_index(path: &Path) -> Result<Index> {
    let mut buf = Vec::new();
    File::open(path)?.read_to_end(&mut buf)?;
    let index = decode(&buf)?;
    tracing::info!(path = %path.display(), version = index.version, num_docs = index.num_docs(), "loaded index");
    Ok(index)
}

/// Per-section byte sizes of an encoded index, without deserializing payloads.
pub fn section_sizes(bytes: &[u8]) -> Result<(u32, Vec<(Section, usize)>)> {
    let (version, sections) = read_header(bytes)?;
    let mut cursor = HEADER_LEN;
    let mut sizes = Vec::with_capacity(sections.len());
    for &section in sections {
        let (payload, next) = read_frame(bytes, cursor, section)?;
        sizes.push((section, payload.len()));
        cursor = next;
    }
    Ok((version, sizes))
}

const V2_SECTIONS: &[Section] = &[Section::Documents, Section::Idf, Section::DocVectors, Section::DocNorms];
const V1_SECTIONS: &[Section] = &[Section::Documents, Section::Idf, Section::DocVectors];

fn read_header(bytes: &[u8]) -> Result<(u32, &'static [Section])> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::corrupt(Section::Header, format!("{} bytes is shorter than the header", bytes.len())));
    }
    if &bytes[..4] != MAGIC {
        return Err(Error::corrupt(Section::Header, "bad magic"));
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    match version {
        FORMAT_VERSION => Ok((version, V2_SECTIONS)),
        LEGACY_VERSION_V1 => Ok((version, V1_SECTIONS)),
        found => Err(Error::UnsupportedVersion { found, supported: FORMAT_VERSION }),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_section<T: Serialize>(out: &mut Vec<u8>, section: Section, value: &T) -> Result<()> {
    let payload = bincode::serialize(value)
        .map_err(|e| Error::Io(std::io::Error::other(format!("encoding {section}: {e}"))))?;
    let crc = crc32fast::hash(&payload);
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(())
}

fn read_frame(bytes: &[u8], start: usize, section: Section) -> Result<(&[u8], usize)> {
    let header_end = start + FRAME_HEADER_LEN;
    if header_end > bytes.len() {
        return Err(Error::corrupt(section, "truncated frame header"));
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[start..start + 8]);
    let len = u64::from_le_bytes(len_bytes);
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&bytes[start + 8..header_end]);
    let stored_crc = u32::from_le_bytes(crc_bytes);

    let available = (bytes.len() - header_end) as u64;
    if len > available {
        return Err(Error::corrupt(section, format!("length {len} exceeds remaining {available} bytes")));
    }
    let end = header_end + len as usize;
    let payload = &bytes[header_end..end];
    let computed_crc = crc32fast::hash(payload);
    if computed_crc != stored_crc {
        return Err(Error::corrupt(
            section,
            format!("CRC32 mismatch: expected {stored_crc:#010x}, got {computed_crc:#010x}"),
        ));
    }
    tracing::debug!(%section, len, crc = %format!("{stored_crc:#010x}"), "section verified");
    Ok((payload, end))
}

fn deserialize_section<T: DeserializeOwned>(payload: &[u8], section: Section) -> Result<T> {
    bincode::deserialize(payload).map_err(|e| Error::corrupt(section, e.to_string()))
}

/// Cross-section consistency: ids are unique, vectors and norms are keyed by
/// exactly the document ids, and every norm agrees with its vector.
fn validate(index: &Index) -> Result<()> {
    let mut ids = BTreeSet::new();
    for doc in &index.documents {
        if !ids.insert(doc.id.as_str()) {
            return Err(Error::corrupt(Section::Documents, format!("duplicate document id {}", doc.id)));
        }
    }
    if !index.doc_vectors.keys().map(String::as_str).eq(ids.iter().copied()) {
        return Err(Error::corrupt(
            Section::DocVectors,
            format!("{} vectors do not match {} document ids", index.doc_vectors.len(), ids.len()),
        ));
    }
    if !index.doc_norms.keys().map(String::as_str).eq(ids.iter().copied()) {
        return Err(Error::corrupt(
            Section::DocNorms,
            format!("{} norms do not match {} document ids", index.doc_norms.len(), ids.len()),
        ));
    }
    for ((id, vector), norm) in index.doc_vectors.iter().zip(index.doc_norms.values()) {
        if vector_norm(vector).to_bits() != norm.to_bits() {
            return Err(Error::corrupt(Section::DocNorms, format!("norm of {id} disagrees with its vector")));
        }
    }
    Ok(())
}
