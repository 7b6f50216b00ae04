//! BAM↔PAM converter (§4.6).
//!
//! Parallel shard conversion is grounded on the teacher's
//! `storage_v2::multi_shard::compact_with_threads`: a sequential classify
//! phase determines shard boundaries, then a `rayon::ThreadPoolBuilder`
//! pool with one thread per host CPU runs the per-shard work concurrently.
//!
//! Boundary resolution is a direct sequential scan of bgzf virtual
//! positions rather than a separately-parsed `.bai`/CSI index file: the
//! scan already visits every record once to assign `Coord`s, so recording
//! each candidate boundary's virtual position as it passes is cheaper than
//! reading and reconciling a second on-disk index. See DESIGN.md.

use crate::cancel::CancelToken;
use crate::config::WriterOptions;
use crate::coord::{Coord, CoordRange, SeqAssigner};
use crate::error::{PamError, Result};
use crate::field::{AuxTag, CigarOp, Record, FLAG_UNMAPPED};
use crate::provider::Provider;
use crate::shard::{ShardReader, ShardWriter};
use noodles_bam as bam;
use noodles_sam::{
    self as sam,
    alignment::record::data::field::{Tag as SamTag, Value as SamValue},
    alignment::record_buf::data::field::Value as SamValueBuf,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

fn sam_record_to_pam(header: &sam::Header, record: &bam::Record, seq_assigner: &mut SeqAssigner) -> Result<Record> {
    use noodles_sam::alignment::record::Record as _;

    let ref_id = record.reference_sequence_id(header).transpose().map_err(|e| PamError::format(e.to_string()))?.map(|i| i as i32).unwrap_or(-1);
    let pos = record.alignment_start().transpose().map_err(|e| PamError::format(e.to_string()))?.map(|p| p.get() as i32 - 1).unwrap_or(-1);

    let cigar = {
        let mut ops = Vec::new();
        for op in record.cigar().iter() {
            let op = op.map_err(|e| PamError::format(e.to_string()))?;
            ops.push(CigarOp { op: op.kind() as u8, len: op.len() as u32 });
        }
        if ops.is_empty() { None } else { Some(ops) }
    };

    let flags = u16::from(record.flags());
    let mate_ref_id = record.mate_reference_sequence_id(header).transpose().map_err(|e| PamError::format(e.to_string()))?.map(|i| i as i32).unwrap_or(-1);
    let mate_pos = record.mate_alignment_start().transpose().map_err(|e| PamError::format(e.to_string()))?.map(|p| p.get() as i32 - 1).unwrap_or(-1);

    let name = record.name().map(|n| n.as_bytes().to_vec());
    let seq: Vec<u8> = record.sequence().iter().collect();
    // `0xff` is BAM's "no quality score" sentinel for a base; offsetting it by
    // 33 like a real Phred score overflows `u8` (panics in debug, wraps in
    // release), so it's mapped straight to `*` instead of through the `+33`.
    let qual: Vec<u8> = record
        .quality_scores()
        .iter()
        .map(|q| q.map(|s| if s == 0xff { b'*' } else { s + 33 }).unwrap_or(b'*'))
        .collect::<std::result::Result<Vec<_>, _>>()
        .unwrap_or_default();

    let mut aux = Vec::new();
    for result in record.data().iter() {
        let (tag, value) = result.map_err(|e| PamError::format(e.to_string()))?;
        let (type_code, payload) = encode_aux_value(&value)?;
        aux.push(AuxTag { tag: [tag.as_ref()[0], tag.as_ref()[1]], type_code, payload });
    }

    // A conforming coordinate-sorted BAM already encodes an unmapped read's
    // own RNAME/POS as its mapped mate's, so `ref_id`/`pos` above are usually
    // already the placement address. The correction below only has an effect
    // when upstream didn't do that (ref_id still -1 despite a mapped mate),
    // keeping such reads sorted next to their mate instead of in the
    // unmapped tail. It must run before `seq_assigner.assign` so the seq
    // disambiguator sees the same (refID,pos) cluster the record actually
    // sorts into, rather than assigning against its stale, pre-correction
    // address and then silently resetting to 0 afterwards.
    let (placed_ref_id, placed_pos) = placement_ref_pos(flags, ref_id, pos, mate_ref_id, mate_pos);
    let coord = seq_assigner.assign(placed_ref_id, placed_pos.max(0));

    Ok(Record {
        coord,
        flags,
        mapq: record.mapping_quality().map(|q| q.get()).unwrap_or(255),
        cigar,
        mate_ref_id,
        mate_pos,
        temp_len: record.template_length(),
        name,
        seq: if seq.is_empty() { None } else { Some(seq) },
        qual: if qual.is_empty() { None } else { Some(qual) },
        aux: if aux.is_empty() { None } else { Some(aux) },
    })
}

fn encode_aux_value(value: &SamValue<'_>) -> Result<(u8, Vec<u8>)> {
    match value {
        SamValue::Character(c) => Ok((b'A', vec![*c])),
        SamValue::Int8(v) => Ok((b'c', v.to_le_bytes().to_vec())),
        SamValue::UInt8(v) => Ok((b'C', v.to_le_bytes().to_vec())),
        SamValue::Int16(v) => Ok((b's', v.to_le_bytes().to_vec())),
        SamValue::UInt16(v) => Ok((b'S', v.to_le_bytes().to_vec())),
        SamValue::Int32(v) => Ok((b'i', v.to_le_bytes().to_vec())),
        SamValue::UInt32(v) => Ok((b'I', v.to_le_bytes().to_vec())),
        SamValue::Float(v) => Ok((b'f', v.to_le_bytes().to_vec())),
        SamValue::String(s) => Ok((b'Z', s.as_ref().to_vec())),
        SamValue::Hex(s) => Ok((b'H', s.as_ref().to_vec())),
        _ => Err(PamError::format("unsupported aux value type (e.g. array) outside PAM's closed aux type set")),
    }
}

/// Inverse of [`encode_aux_value`]: reconstruct an owned `record_buf` aux
/// value from a stored `(type_code, payload)` pair, against the same closed
/// `{A,c,C,s,S,i,I,f,Z,H}` type set (§4.1).
fn decode_aux_value(type_code: u8, payload: &[u8]) -> Result<SamValueBuf> {
    fn fixed<const N: usize>(payload: &[u8]) -> Result<[u8; N]> {
        payload
            .try_into()
            .map_err(|_| PamError::format(format!("aux payload length {} does not match the {}-byte type", payload.len(), N)))
    }

    match type_code {
        b'A' => Ok(SamValueBuf::Character(*payload.first().ok_or_else(|| PamError::format("aux type 'A' payload is empty"))?)),
        b'c' => Ok(SamValueBuf::Int8(i8::from_le_bytes(fixed(payload)?))),
        b'C' => Ok(SamValueBuf::UInt8(u8::from_le_bytes(fixed(payload)?))),
        b's' => Ok(SamValueBuf::Int16(i16::from_le_bytes(fixed(payload)?))),
        b'S' => Ok(SamValueBuf::UInt16(u16::from_le_bytes(fixed(payload)?))),
        b'i' => Ok(SamValueBuf::Int32(i32::from_le_bytes(fixed(payload)?))),
        b'I' => Ok(SamValueBuf::UInt32(u32::from_le_bytes(fixed(payload)?))),
        b'f' => Ok(SamValueBuf::Float(f32::from_le_bytes(fixed(payload)?))),
        b'Z' => Ok(SamValueBuf::String(payload.to_vec().into())),
        b'H' => Ok(SamValueBuf::Hex(payload.to_vec().into())),
        other => Err(PamError::format(format!("unknown aux type code '{}' outside PAM's closed aux type set", other as char))),
    }
}

/// Convert a BAM file into a PAM dataset directory.
///
/// Phase 1 (sequential): scan the BAM once, converting every record and
/// recording candidate shard-boundary bgzf virtual positions roughly
/// `bytes_per_shard` apart; collapse boundaries whose resolved `Coord`s
/// collide (two records at the same address never straddle a shard).
///
/// Phase 2 (parallel, one thread per host CPU): each shard independently
/// re-opens the BAM, seeks to its boundary's virtual position, and writes
/// its own PAM shard — mirroring the teacher's classify/parallel-apply
/// split.
pub fn bam_to_pam(bam_path: &Path, out_dir: &Path, bytes_per_shard: u64, writer_options: WriterOptions, cancel: CancelToken) -> Result<()> {
    let _span = tracing::info_span!("bam_to_pam", bam = %bam_path.display(), out = %out_dir.display()).entered();
    tracing::debug!(bytes_per_shard, "starting bam to pam conversion");
    std::fs::create_dir_all(out_dir)?;

    let mut reader = bam::io::reader::Builder::default().build_from_path(bam_path).map_err(PamError::from)?;
    let header = reader.read_header().map_err(PamError::from)?;
    let header_bytes = header.to_string().into_bytes();

    let mut boundaries: Vec<(std::io::SeekFrom, Coord)> = Vec::new();
    let mut bytes_since_boundary = 0u64;
    let mut last_cluster: Option<(i32, i32)> = None;
    let mut seq_assigner = SeqAssigner::new();

    for result in reader.records() {
        cancel.check()?;
        let bam_record = result.map_err(PamError::from)?;
        let pam_record = sam_record_to_pam(&header, &bam_record, &mut seq_assigner)?;
        let approx_bytes = pam_record.seq.as_ref().map(|s| s.len()).unwrap_or(0) as u64 + 64;
        bytes_since_boundary += approx_bytes;
        let cluster = (pam_record.coord.ref_id, pam_record.coord.pos);

        // A candidate boundary is only taken at the first record of a fresh
        // (refID,pos) cluster — same rule as `planner::same_cluster` — so a
        // shard split never lands inside a run of co-located reads.
        if boundaries.is_empty() || (bytes_since_boundary >= bytes_per_shard && last_cluster != Some(cluster)) {
            boundaries.push((std::io::SeekFrom::Start(0), pam_record.coord));
            bytes_since_boundary = 0;
        }
        last_cluster = Some(cluster);
    }

    if boundaries.is_empty() {
        return Ok(());
    }

    let mut ranges = Vec::with_capacity(boundaries.len());
    for i in 0..boundaries.len() {
        let start = boundaries[i].1;
        let limit = boundaries.get(i + 1).map(|b| b.1).unwrap_or_else(|| bump_unbounded(start));
        if start < limit {
            ranges.push(CoordRange::new(start, limit));
        }
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(crate::resource::ResourceManager::auto_tune().write_parallelism)
        .build()
        .map_err(|e| PamError::format(format!("failed to build converter thread pool: {e}")))?;

    let results: Vec<Result<()>> = pool.install(|| {
        use rayon::prelude::*;
        ranges
            .par_iter()
            .map(|range| convert_shard(bam_path, &header, &header_bytes, out_dir, *range, writer_options.clone(), cancel.clone()))
            .collect()
    });
    results.into_iter().collect::<Result<Vec<()>>>()?;
    tracing::info!(shards = ranges.len(), "bam to pam conversion complete");
    Ok(())
}

/// An exclusive upper bound covering every record that could follow `c` to
/// the end of the file, mapped or unmapped. Unlike `planner::bump` (which
/// only needs to clear one specific last record), this has to stay open
/// over however many more records the final boundary's chunk contains, so
/// it always resolves to the same unmapped-with-max-seq sentinel regardless
/// of whether `c` itself is mapped or unmapped — any finite mapped sentinel
/// would sort before the unmapped tail and wrongly exclude it (see
/// `CoordRange::universal`).
fn bump_unbounded(_c: Coord) -> Coord {
    Coord::unmapped(i32::MAX)
}

fn convert_shard(
    bam_path: &Path,
    header: &sam::Header,
    header_bytes: &[u8],
    out_dir: &Path,
    range: CoordRange,
    writer_options: WriterOptions,
    cancel: CancelToken,
) -> Result<()> {
    let mut reader = bam::io::reader::Builder::default().build_from_path(bam_path).map_err(PamError::from)?;
    reader.read_header().map_err(PamError::from)?;

    let mut writer = ShardWriter::open(out_dir, range, header_bytes, writer_options)?;
    let mut seq_assigner = SeqAssigner::new();
    for result in reader.records() {
        cancel.check()?;
        let bam_record = result.map_err(PamError::from)?;
        let pam_record = sam_record_to_pam(header, &bam_record, &mut seq_assigner)?;
        if !range.contains(pam_record.coord) {
            continue;
        }
        writer.write(pam_record)?;
    }
    writer.close()
}

fn pam_record_to_sam(header: &sam::Header, record: &Record) -> Result<sam::alignment::RecordBuf> {
    use sam::alignment::record_buf::{Cigar as CigarBuf, Name, QualityScores, Sequence};

    let mut builder = sam::alignment::RecordBuf::builder();
    builder = builder.set_flags(sam::alignment::record::Flags::from(record.flags));

    if record.coord.is_mapped() {
        if let Some((name, _)) = header.reference_sequences().get_index(record.coord.ref_id as usize) {
            builder = builder.set_reference_sequence_id(header.reference_sequences().get_index_of(name).unwrap_or(0));
        }
        builder = builder.set_alignment_start(noodles_core::Position::new((record.coord.pos + 1).max(1) as usize).expect("position >= 1"));
    }

    if let Some(name) = &record.name {
        builder = builder.set_name(Name::from(name.clone()));
    }
    if let Some(cigar) = &record.cigar {
        let mut buf = CigarBuf::default();
        for op in cigar {
            buf.as_mut().push(sam::alignment::record::cigar::Op::new(
                sam::alignment::record::cigar::op::Kind::try_from(op.op).unwrap_or(sam::alignment::record::cigar::op::Kind::Match),
                op.len as usize,
            ));
        }
        builder = builder.set_cigar(buf);
    }
    if let Some(seq) = &record.seq {
        builder = builder.set_sequence(Sequence::from(seq.clone()));
    }
    if let Some(qual) = &record.qual {
        let scores: Vec<u8> = qual.iter().map(|q| q.saturating_sub(33)).collect();
        builder = builder.set_quality_scores(QualityScores::from(scores));
    }
    if record.mate_ref_id >= 0 {
        builder = builder.set_mate_reference_sequence_id(record.mate_ref_id as usize);
        if record.mate_pos >= 0 {
            builder = builder.set_mate_alignment_start(noodles_core::Position::new((record.mate_pos + 1) as usize).expect("position >= 1"));
        }
    }
    builder = builder.set_template_length(record.temp_len);
    builder = builder.set_mapping_quality(sam::alignment::record::MappingQuality::new(record.mapq));

    if let Some(tags) = &record.aux {
        let mut data = sam::alignment::record_buf::Data::default();
        for tag in tags {
            let value = decode_aux_value(tag.type_code, &tag.payload)?;
            data.insert(SamTag::new(tag.tag), value);
        }
        builder = builder.set_data(data);
    }

    Ok(builder.build())
}

/// Convert a PAM dataset back into a single coordinate-sorted BAM file.
///
/// Fans the dataset's planned read-shards out across a bounded thread pool
/// (one worker per shard), each producing its own in-memory bgzf-compressed
/// byte range; the main thread then writes them out in shard order so the
/// BAM's bgzf block stream stays contiguous and sorted, even though the
/// compression itself ran out of order.
pub fn pam_to_bam(dataset_dir: &Path, bam_path: &Path, cancel: CancelToken) -> Result<()> {
    let _span = tracing::info_span!("pam_to_bam", dataset = %dataset_dir.display(), bam = %bam_path.display()).entered();
    let provider = Provider::open(dataset_dir)?;
    let header_bytes = provider.header()?;
    let header_text = String::from_utf8(header_bytes).map_err(|e| PamError::format(e.to_string()))?;
    let header: sam::Header = header_text.parse().map_err(|e: sam::header::ParseError| PamError::format(e.to_string()))?;

    let shards = provider.shards().to_vec();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(crate::resource::ResourceManager::auto_tune().write_parallelism)
        .build()
        .map_err(|e| PamError::format(format!("failed to build converter thread pool: {e}")))?;

    let header_for_shards = header.clone();
    let encoded: Vec<Result<Vec<u8>>> = pool.install(|| {
        use rayon::prelude::*;
        shards
            .par_iter()
            .map(|range| encode_shard_to_bam_bytes(&provider, &header_for_shards, *range, cancel.clone()))
            .collect()
    });

    let out = File::create(bam_path)?;
    let mut writer = bam::io::Writer::new(BufWriter::new(out));
    writer.write_header(&header).map_err(PamError::from)?;
    for chunk in encoded {
        let bytes = chunk?;
        writer.get_mut().write_all(&bytes)?;
    }
    use std::io::Write as _;
    writer.get_mut().flush()?;
    tracing::info!(shards = shards.len(), "pam to bam conversion complete");
    Ok(())
}

fn encode_shard_to_bam_bytes(provider: &Provider, header: &sam::Header, range: CoordRange, cancel: CancelToken) -> Result<Vec<u8>> {
    let reader: ShardReader = provider.open_shard(range, crate::config::ReaderOptions::default())?;
    let mut buf = Vec::new();
    {
        let mut writer = bam::io::Writer::new(&mut buf);
        for result in reader {
            cancel.check()?;
            let record = result?;
            let sam_record = pam_record_to_sam(header, &record)?;
            use noodles_sam::alignment::io::Write as _;
            writer.write_alignment_record(header, &sam_record).map_err(PamError::from)?;
        }
    }
    Ok(buf)
}

/// A read whose `FLAG_UNMAPPED` bit is set but whose mate is mapped keeps
/// the mate's address for sort placement, matching BAM's own "place
/// unmapped reads next to their mapped mate" convention. Used by
/// `sam_record_to_pam` before `SeqAssigner::assign` runs, so the seq
/// disambiguator sees the same cluster the record is actually placed in.
fn placement_ref_pos(flags: u16, ref_id: i32, pos: i32, mate_ref_id: i32, mate_pos: i32) -> (i32, i32) {
    if flags & FLAG_UNMAPPED != 0 && mate_ref_id >= 0 {
        (mate_ref_id, mate_pos)
    } else {
        (ref_id, pos)
    }
}

/// Standalone convenience wrapper over [`placement_ref_pos`] for a fully
/// assembled [`Record`] — the `seq` component is always reset to 0 since it
/// only carries meaning within `sam_record_to_pam`'s own assignment pass.
pub fn placement_coord(record: &Record) -> Coord {
    let (ref_id, pos) = placement_ref_pos(record.flags, record.coord.ref_id, record.coord.pos, record.mate_ref_id, record.mate_pos);
    Coord::new(ref_id, pos, 0)
}
