//! Binary Patch Format - Diff and Apply for Chained Content Units
//!
//! This module implements the differential half of the codec: computing a
//! patch between two plaintexts and replaying it.
//!
//! ## How a Patch is Built
//!
//! 1. **Trim** the common prefix and suffix — wiki edits usually touch a
//!    small region of a large page, so this alone removes most of the input
//!    before the quadratic part runs.
//! 2. **Myers greedy search** over the remaining middle produces a minimal
//!    sequence of equal/delete/insert spans. The search is capped: beyond
//!    `MAX_EDIT_DISTANCE` the diff degrades to a full replace of the middle
//!    (patches are a space optimization, minimality is not guaranteed).
//! 3. **Efficiency cleanup** merges adjacent same-kind spans and folds
//!    short equal runs that are flanked by edits on both sides into the
//!    surrounding edit pair. This trades a few duplicated bytes for fewer
//!    operations, which parses faster and compresses better.
//! 4. **Serialize** ops as `tag + varint length (+ insert bytes)` records
//!    and compress the whole stream with bzip2.
//!
//! ## Round-Trip Contract
//!
//! For every pair of byte strings `(a, b)`, including `a == b` and empty
//! inputs:
//!
//! ```text
//! apply(a, diff(a, b)) == b    (byte-exact)
//! ```
//!
//! ## Failure Modes
//!
//! `apply` never panics on bad input: truncated streams, unknown op tags,
//! trailing garbage and spans that overrun the source all surface as
//! `Error::MalformedPatch`, and a corrupt bzip2 envelope surfaces as
//! `Error::Decompression`.

use std::io::{Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{varint, Error, Result};

/// Edit-distance cap for the Myers search. Inputs further apart than this
/// (after prefix/suffix trimming) are stored as a full replace.
const MAX_EDIT_DISTANCE: usize = 1024;

/// Minimum length an equal run must have to survive between two edits.
/// Shorter runs are folded into the surrounding edit pair.
const EDIT_COST: usize = 4;

const TAG_EQUAL: u8 = 0;
const TAG_DELETE: u8 = 1;
const TAG_INSERT: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpanKind {
    Equal,
    Delete,
    Insert,
}

#[derive(Debug, Clone, PartialEq)]
struct Span {
    kind: SpanKind,
    bytes: Vec<u8>,
}

impl Span {
    fn new(kind: SpanKind, bytes: &[u8]) -> Self {
        Self {
            kind,
            bytes: bytes.to_vec(),
        }
    }
}

/// Compute a patch that rewrites `source` into `target`.
pub fn diff(source: &[u8], target: &[u8]) -> Result<Bytes> {
    let prefix = common_prefix(source, target);
    let (src_mid, tgt_mid) = (&source[prefix..], &target[prefix..]);
    let suffix = common_suffix(src_mid, tgt_mid);

    let src_mid = &src_mid[..src_mid.len() - suffix];
    let tgt_mid = &tgt_mid[..tgt_mid.len() - suffix];

    let mut spans = Vec::new();
    if prefix > 0 {
        spans.push(Span::new(SpanKind::Equal, &source[..prefix]));
    }
    spans.extend(myers(src_mid, tgt_mid));
    if suffix > 0 {
        spans.push(Span::new(SpanKind::Equal, &source[source.len() - suffix..]));
    }

    let spans = cleanup_efficiency(spans);
    serialize(&spans)
}

/// Replay a patch produced by [`diff`] against its source plaintext.
pub fn apply(source: &[u8], patch: &[u8]) -> Result<Bytes> {
    let ops = deserialize(patch)?;

    let mut target = BytesMut::new();
    let mut cursor = 0usize;

    for op in &ops {
        match op {
            WireOp::Equal(len) => {
                let end = cursor
                    .checked_add(*len)
                    .filter(|end| *end <= source.len())
                    .ok_or_else(|| {
                        Error::MalformedPatch("equal span overruns source".to_string())
                    })?;
                target.put_slice(&source[cursor..end]);
                cursor = end;
            }
            WireOp::Delete(len) => {
                let end = cursor
                    .checked_add(*len)
                    .filter(|end| *end <= source.len())
                    .ok_or_else(|| {
                        Error::MalformedPatch("delete span overruns source".to_string())
                    })?;
                cursor = end;
            }
            WireOp::Insert(bytes) => {
                target.put_slice(bytes);
            }
        }
    }

    if cursor != source.len() {
        return Err(Error::MalformedPatch(format!(
            "patch spans {cursor} of {} source bytes",
            source.len()
        )));
    }

    Ok(target.freeze())
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

fn common_suffix(a: &[u8], b: &[u8]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

/// Greedy O(ND) shortest-edit search, capped at `MAX_EDIT_DISTANCE`.
fn myers(a: &[u8], b: &[u8]) -> Vec<Span> {
    if a.is_empty() && b.is_empty() {
        return Vec::new();
    }
    if a.is_empty() {
        return vec![Span::new(SpanKind::Insert, b)];
    }
    if b.is_empty() {
        return vec![Span::new(SpanKind::Delete, a)];
    }

    let n = a.len() as isize;
    let m = b.len() as isize;
    let cap = ((n + m) as usize).min(MAX_EDIT_DISTANCE) as isize;
    let offset = cap + 1;

    // v[offset + k] = furthest x on diagonal k; trace keeps one snapshot
    // per round for the backtrack.
    let mut v = vec![0isize; 2 * cap as usize + 3];
    let mut trace: Vec<Vec<isize>> = Vec::new();
    let mut found = None;

    'search: for d in 0..=cap {
        trace.push(v.clone());
        let mut k = -d;
        while k <= d {
            let idx = (offset + k) as usize;
            let mut x = if k == -d || (k != d && v[idx - 1] < v[idx + 1]) {
                v[idx + 1]
            } else {
                v[idx - 1] + 1
            };
            let mut y = x - k;
            while x < n && y < m && a[x as usize] == b[y as usize] {
                x += 1;
                y += 1;
            }
            v[idx] = x;
            if x >= n && y >= m {
                found = Some(d);
                break 'search;
            }
            k += 2;
        }
    }

    let Some(found_d) = found else {
        // Over the cap: full replace.
        return vec![
            Span::new(SpanKind::Delete, a),
            Span::new(SpanKind::Insert, b),
        ];
    };

    // Backtrack from (n, m), emitting unit steps in reverse.
    let mut steps: Vec<(SpanKind, u8)> = Vec::new();
    let (mut x, mut y) = (n, m);

    for d in (0..=found_d).rev() {
        let v = &trace[d as usize];
        let k = x - y;
        let idx = (offset + k) as usize;

        let prev_k = if k == -d || (k != d && v[idx - 1] < v[idx + 1]) {
            k + 1
        } else {
            k - 1
        };
        let prev_x = v[(offset + prev_k) as usize];
        let prev_y = prev_x - prev_k;

        while x > prev_x && y > prev_y {
            x -= 1;
            y -= 1;
            steps.push((SpanKind::Equal, a[x as usize]));
        }

        if d > 0 {
            if x == prev_x {
                y -= 1;
                steps.push((SpanKind::Insert, b[y as usize]));
            } else {
                x -= 1;
                steps.push((SpanKind::Delete, a[x as usize]));
            }
        }
    }

    // Reverse into forward order and fuse unit steps into spans.
    let mut spans: Vec<Span> = Vec::new();
    for (kind, byte) in steps.into_iter().rev() {
        match spans.last_mut() {
            Some(last) if last.kind == kind => last.bytes.push(byte),
            _ => spans.push(Span {
                kind,
                bytes: vec![byte],
            }),
        }
    }
    spans
}

/// Merge adjacent same-kind spans and fold short equalities flanked by
/// edits into the surrounding edit pair, shrinking the operation count at
/// slight byte cost.
fn cleanup_efficiency(spans: Vec<Span>) -> Vec<Span> {
    let mut spans = coalesce(spans);

    loop {
        let foldable = (1..spans.len().saturating_sub(1)).find(|&i| {
            spans[i].kind == SpanKind::Equal
                && spans[i].bytes.len() < EDIT_COST
                && spans[i - 1].kind != SpanKind::Equal
                && spans[i + 1].kind != SpanKind::Equal
        });

        let Some(i) = foldable else {
            return spans;
        };

        // The equality's bytes appear in both the deleted source run and
        // the inserted target run of the merged edit.
        let equal = spans.remove(i);
        spans.insert(i, Span::new(SpanKind::Delete, &equal.bytes));
        spans.insert(i + 1, Span::new(SpanKind::Insert, &equal.bytes));
        spans = coalesce(spans);
    }
}

fn coalesce(spans: Vec<Span>) -> Vec<Span> {
    // Deletes sort before inserts inside one edit region so the merged
    // form stays canonical.
    let mut out: Vec<Span> = Vec::with_capacity(spans.len());
    for span in spans {
        if span.bytes.is_empty() {
            continue;
        }

        if matches!(out.last(), Some(last) if last.kind == span.kind) {
            let last = out.last_mut().expect("matched non-empty");
            last.bytes.extend_from_slice(&span.bytes);
            continue;
        }

        if span.kind == SpanKind::Delete
            && matches!(out.last(), Some(last) if last.kind == SpanKind::Insert)
        {
            // A delete and an insert inside one edit region commute; no two
            // adjacent spans share a kind here, so after the pop the tail is
            // either a delete (merge) or something else (push).
            let insert = out.pop().expect("matched non-empty");
            if matches!(out.last(), Some(prev) if prev.kind == SpanKind::Delete) {
                let prev = out.last_mut().expect("matched non-empty");
                prev.bytes.extend_from_slice(&span.bytes);
            } else {
                out.push(span);
            }
            out.push(insert);
            continue;
        }

        out.push(span);
    }
    out
}

fn serialize(spans: &[Span]) -> Result<Bytes> {
    let mut wire = BytesMut::new();
    varint::encode_u64(&mut wire, spans.len() as u64);

    for span in spans {
        let tag = match span.kind {
            SpanKind::Equal => TAG_EQUAL,
            SpanKind::Delete => TAG_DELETE,
            SpanKind::Insert => TAG_INSERT,
        };
        wire.put_u8(tag);
        varint::encode_u64(&mut wire, span.bytes.len() as u64);
        if span.kind == SpanKind::Insert {
            wire.put_slice(&span.bytes);
        }
    }

    let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::best());
    encoder
        .write_all(&wire)
        .and_then(|_| encoder.finish())
        .map(Bytes::from)
        .map_err(|e| Error::Compression(e.to_string()))
}

/// Parsed wire operation. Equal and Delete carry only a length — their
/// bytes come from the source at apply time.
#[derive(Debug, Clone, PartialEq, Eq)]
enum WireOp {
    Equal(usize),
    Delete(usize),
    Insert(Vec<u8>),
}

fn deserialize(patch: &[u8]) -> Result<Vec<WireOp>> {
    let mut decoder = bzip2::read::BzDecoder::new(patch);
    let mut wire = Vec::new();
    decoder
        .read_to_end(&mut wire)
        .map_err(|e| Error::Decompression(e.to_string()))?;

    let mut buf = &wire[..];
    let count = varint::decode_u64(&mut buf)?;

    // No up-front capacity: the count is untrusted until the bytes that
    // back it have actually been parsed.
    let mut ops = Vec::new();
    for _ in 0..count {
        if !buf.has_remaining() {
            return Err(Error::MalformedPatch("truncated op stream".to_string()));
        }
        let tag = buf.get_u8();
        let len = varint::decode_u64(&mut buf)? as usize;

        let op = match tag {
            TAG_EQUAL => WireOp::Equal(len),
            TAG_DELETE => WireOp::Delete(len),
            TAG_INSERT => {
                if buf.remaining() < len {
                    return Err(Error::MalformedPatch("truncated insert bytes".to_string()));
                }
                let bytes = buf[..len].to_vec();
                buf.advance(len);
                WireOp::Insert(bytes)
            }
            other => {
                return Err(Error::MalformedPatch(format!("unknown op tag {other}")));
            }
        };

        ops.push(op);
    }

    if buf.has_remaining() {
        return Err(Error::MalformedPatch("trailing bytes after ops".to_string()));
    }

    Ok(ops)
}
