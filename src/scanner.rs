// src/scanner.rs

//! Dependency scanner
//!
//! Finds which of a set of store hashes occur anywhere in a byte stream. A
//! store can hold tens of thousands of hashes and packages can contain
//! gigabytes of binaries, so every hash is searched for at once with an
//! Aho–Corasick automaton (the algorithm behind `fgrep`) in a single pass.

use crate::config::{DEFAULT_SCAN_BUFFER_SIZE, MIN_SCAN_BUFFER_SIZE};
use crate::error::{Error, Result};
use crate::store::name::HASH_LEN;
use aho_corasick::AhoCorasick;
use std::io::{self, Read};

/// Bytes carried over from one read to the next so that hashes split across
/// two reads are still found
const OVERLAP: usize = HASH_LEN - 1;

/// Scans readers for a fixed set of store hashes
#[derive(Debug)]
pub struct DependencyScanner {
    matcher: AhoCorasick,
    patterns: usize,

    /// Reusable read buffer. The first `OVERLAP` bytes hold the tail of the
    /// previous read.
    buf: Vec<u8>,

    /// Indexes of the hashes found by the last scan, possibly repeated
    matches: Vec<usize>,
}

impl DependencyScanner {
    /// Create a scanner for `hashes` with the default buffer size
    pub fn new<I, P>(hashes: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        Self::with_buffer_size(hashes, DEFAULT_SCAN_BUFFER_SIZE)
    }

    /// Create a scanner whose reads are at most `buffer_size - 31` bytes
    pub fn with_buffer_size<I, P>(hashes: I, buffer_size: usize) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        let patterns: Vec<P> = hashes.into_iter().collect();
        let matcher = AhoCorasick::new(&patterns)
            .map_err(|e| Error::Config(format!("Failed to build hash matcher: {}", e)))?;

        Ok(Self {
            matcher,
            patterns: patterns.len(),
            buf: vec![0; buffer_size.max(MIN_SCAN_BUFFER_SIZE)],
            // Most packages have well under 256 non-unique references.
            matches: Vec::with_capacity(256),
        })
    }

    /// Number of hashes the scanner looks for
    pub fn pattern_count(&self) -> usize {
        self.patterns
    }

    /// Read `reader` to the end, returning the index of every hash found.
    ///
    /// Indexes refer to the order the hashes were given to the constructor.
    /// The result may contain duplicates and is only valid until the next
    /// scan. Read errors other than interruptions are returned as-is.
    pub fn scan<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<&[usize]> {
        self.matches.clear();
        let mut carry = 0;
        loop {
            let n = match reader.read(&mut self.buf[carry..]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            let filled = carry + n;

            // Every match includes at least one byte of the new read, since
            // the carried tail is shorter than a hash. No match is counted twice.
            self.matches.extend(
                self.matcher
                    .find_overlapping_iter(&self.buf[..filled])
                    .map(|m| m.pattern().as_usize()),
            );

            let keep = filled.min(OVERLAP);
            self.buf.copy_within(filled - keep..filled, 0);
            carry = keep;
        }
        Ok(&self.matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::io::Cursor;

    const BAR: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const FOO: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const GO: &str = "mil5crms7gfpv03vjj094zz1igvapv6i";

    /// A reader that never returns more than `chunk` bytes per call
    struct Chunked<'a> {
        data: &'a [u8],
        chunk: usize,
    }

    impl Read for Chunked<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.data.len().min(self.chunk).min(buf.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    fn found(scanner: &mut DependencyScanner, data: &[u8]) -> BTreeSet<usize> {
        scanner
            .scan(&mut Cursor::new(data))
            .unwrap()
            .iter()
            .copied()
            .collect()
    }

    #[test]
    fn test_finds_embedded_hashes() {
        let mut scanner = DependencyScanner::new([BAR, FOO, GO]).unwrap();
        let data = format!("#!/nix/store/{}-bash/bin/bash\nexec /nix/store/{}-go-1.20.2/bin/go\n", BAR, GO);

        assert_eq!(found(&mut scanner, data.as_bytes()), BTreeSet::from([0, 2]));
        assert_eq!(scanner.pattern_count(), 3);
    }

    #[test]
    fn test_reports_duplicates() {
        let mut scanner = DependencyScanner::new([BAR]).unwrap();
        let data = format!("{}:{}", BAR, BAR);
        assert_eq!(scanner.scan(&mut Cursor::new(data)).unwrap(), &[0, 0]);
    }

    #[test]
    fn test_no_matches() {
        let mut scanner = DependencyScanner::new([BAR, FOO]).unwrap();
        assert!(found(&mut scanner, b"").is_empty());
        assert!(found(&mut scanner, b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").is_empty());
        assert!(found(&mut scanner, b"nothing to see here").is_empty());
    }

    #[test]
    fn test_empty_hash_set() {
        let mut scanner = DependencyScanner::new(Vec::<&str>::new()).unwrap();
        assert!(found(&mut scanner, BAR.as_bytes()).is_empty());
    }

    #[test]
    fn test_overlapping_hashes() {
        // The tail of one hash plus the following bytes form another hash.
        let first = "0123456789abcdfghijklmnpqrsvwxyz";
        let second = "abcdfghijklmnpqrsvwxyz0123456789";
        let mut scanner = DependencyScanner::new([first, second]).unwrap();
        let data = format!("{}0123456789", first);
        assert_eq!(found(&mut scanner, data.as_bytes()), BTreeSet::from([0, 1]));
    }

    #[test]
    fn test_hash_straddling_chunk_boundaries() {
        let mut data = vec![b'.'; 300];
        for offset in [0usize, 1, 31, 32, 33, 63, 64, 65, 100, 127, 128, 200, 268] {
            data.iter_mut().for_each(|b| *b = b'.');
            data[offset..offset + HASH_LEN].copy_from_slice(GO.as_bytes());

            for buffer_size in [64usize, 65, 70, 96, 97, 128, 255] {
                for chunk in [1usize, 2, 7, 31, 32, 33, 64, 1000] {
                    let mut scanner =
                        DependencyScanner::with_buffer_size([BAR, GO], buffer_size).unwrap();
                    let mut reader = Chunked { data: &data, chunk };
                    let matches = scanner.scan(&mut reader).unwrap();
                    assert_eq!(
                        matches,
                        &[1],
                        "offset {} buffer {} chunk {}",
                        offset,
                        buffer_size,
                        chunk
                    );
                }
            }
        }
    }

    #[test]
    fn test_scanner_is_reusable() {
        let mut scanner = DependencyScanner::with_buffer_size([BAR, FOO], 64).unwrap();
        assert_eq!(found(&mut scanner, FOO.as_bytes()), BTreeSet::from([1]));
        // Nothing from the previous scan leaks into the next one.
        assert!(found(&mut scanner, &FOO.as_bytes()[1..]).is_empty());
        assert_eq!(found(&mut scanner, BAR.as_bytes()), BTreeSet::from([0]));
    }

    #[test]
    fn test_read_errors_propagate() {
        struct Failing;
        impl Read for Failing {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::other("disk on fire"))
            }
        }

        let mut scanner = DependencyScanner::new([BAR]).unwrap();
        assert!(matches!(scanner.scan(&mut Failing), Err(Error::Io(_))));
    }
}
