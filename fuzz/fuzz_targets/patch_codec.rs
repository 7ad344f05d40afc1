#![no_main]

use libfuzzer_sys::fuzz_target;
use palimpsest_core::{apply, decompress, diff, Encoding};

fuzz_target!(|data: &[u8]| {
    // Apply arbitrary bytes as a patch. Tests handling of:
    // - Garbage bzip2 envelopes
    // - Truncated varints and op streams
    // - Unknown op tags
    // - Spans that overrun the source
    // Must return an error, never panic.
    let _ = apply(b"a stable source text", data);
    let _ = apply(b"", data);

    // Arbitrary bytes are not valid compression streams either.
    for encoding in [Encoding::Gzip, Encoding::Bzip2, Encoding::Lzma2] {
        let _ = decompress(data, encoding);
    }

    // Structured round trip: any split of the input is a (source, target)
    // pair whose patch must replay exactly.
    let mid = data.len() / 2;
    let (source, target) = data.split_at(mid);
    let patch = diff(source, target).expect("diff is total");
    let rebuilt = apply(source, &patch).expect("own patch applies");
    assert_eq!(&rebuilt[..], target);
});
