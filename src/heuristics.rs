//! Detectors for compiler artifacts that legitimately differ between
//! two builds of the same source: `__FILE__`, `__TIME__` and
//! `__DATE__` literals and the stamp MIDL plants into type libraries.
//!
//! Every detector is evaluated on *both* files at the start of a
//! difference; only an agreeing pair claims the diff. Detection is
//! pure: it reads nothing but the two mapped byte regions and the
//! readers' PDB paths.

use crate::block::BlockList;

/// Everything a detector may look at in one file.
pub struct FileFacts<'a> {
    /// The file's mapped bytes.
    pub bytes: &'a [u8],
    /// PDB path from the CodeView record, empty if none.
    pub pdb_path: &'a str,
    /// One block per resource-leaf payload.
    pub resource_blocks: &'a BlockList,
}

// String literals come in both character widths; detectors are
// parametric over the width and the comparator tries wide first.
trait CharSet {
    const UNIT: usize;
    fn read(bytes: &[u8], offset: usize) -> Option<u32>;
}

struct Narrow;
struct Wide;

impl CharSet for Narrow {
    const UNIT: usize = 1;

    fn read(bytes: &[u8], offset: usize) -> Option<u32> {
        bytes.get(offset).map(|&b| u32::from(b))
    }
}

impl CharSet for Wide {
    const UNIT: usize = 2;

    fn read(bytes: &[u8], offset: usize) -> Option<u32> {
        let pair = bytes.get(offset..offset + 2)?;
        Some(u32::from(u16::from_le_bytes(pair.try_into().unwrap())))
    }
}

fn digit<C: CharSet>(bytes: &[u8], offset: usize) -> Option<u32> {
    let unit = C::read(bytes, offset)?;
    char::from_u32(unit)?.to_digit(10)
}

// Case-folds and treats '/' and '\' as the same character.
fn normalize_path_char(c: u32) -> u32 {
    let c = char::from_u32(c).map_or(c, |c| c.to_ascii_uppercase() as u32);
    if c == u32::from('/') {
        u32::from('\\')
    } else {
        c
    }
}

/// The result of one agreed heuristic claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    /// What was recognized, for verbose reports.
    pub description: &'static str,
    /// Bytes to consume from the diff start; at least the diff size.
    pub skip: usize,
}

/// Runs the detectors in order and returns the first agreeing claim.
pub fn filter_difference(
    first: &FileFacts<'_>,
    second: &FileFacts<'_>,
    start1: usize,
    start2: usize,
    size: usize,
    tlb_timestamp: bool,
) -> Option<Claim> {
    if let Some(claim) = detect_file_macro(first, second, start1, start2, size) {
        return Some(claim);
    }
    if let Some(claim) = detect_time_macro(first, second, start1, start2, size) {
        return Some(claim);
    }
    if let Some(claim) = detect_date_macro(first, second, start1, start2, size) {
        return Some(claim);
    }
    if tlb_timestamp {
        if let Some(claim) = detect_midl_stamp(first, second, start1, start2, size) {
            return Some(claim);
        }
    }
    None
}

// ------------------------------------------------------------------
// __FILE__

// A __FILE__ literal is a build-tree path, so it shares its leading
// drive prefix with the PDB path. Look for that anchor within one
// PDB-path length before the diff and require the diff to fall inside
// the located literal.
fn file_macro_at<C: CharSet>(bytes: &[u8], pdb_path: &str, diff_start: usize) -> bool {
    let pdb: Vec<u32> = pdb_path
        .chars()
        .map(|c| normalize_path_char(c as u32))
        .collect();
    if pdb.len() < 3 {
        return false;
    }

    let window = pdb.len() * C::UNIT;
    let low = diff_start.saturating_sub(window);

    for start in low..=diff_start {
        let mut matched = 0;
        for (i, &expected) in pdb.iter().enumerate() {
            match C::read(bytes, start + i * C::UNIT) {
                Some(c) if normalize_path_char(c) == expected => matched += 1,
                _ => break,
            }
        }
        if matched < 3 {
            continue;
        }
        if diff_start < start + pdb.len() * C::UNIT {
            return true;
        }
    }

    false
}

/// Claims small diffs inside source-path string literals.
pub fn detect_file_macro(
    first: &FileFacts<'_>,
    second: &FileFacts<'_>,
    start1: usize,
    start2: usize,
    size: usize,
) -> Option<Claim> {
    if size > 5 {
        return None;
    }
    // a path-length change shifts everything after it; not claimable
    if first.pdb_path.len() != second.pdb_path.len() || first.pdb_path.is_empty() {
        return None;
    }

    let wide = file_macro_at::<Wide>(first.bytes, first.pdb_path, start1)
        && file_macro_at::<Wide>(second.bytes, second.pdb_path, start2);
    let narrow = || {
        file_macro_at::<Narrow>(first.bytes, first.pdb_path, start1)
            && file_macro_at::<Narrow>(second.bytes, second.pdb_path, start2)
    };

    if wide || narrow() {
        Some(Claim {
            description: "__FILE__ macro",
            skip: size,
        })
    } else {
        None
    }
}

// ------------------------------------------------------------------
// __TIME__

// Locates the "hh:mm:ss" literal around the diff point and returns
// the offset of its NUL terminator.
fn time_macro_at<C: CharSet>(bytes: &[u8], diff_start: usize) -> Option<usize> {
    for colon_delta in [-2isize, -1, 1, 2] {
        let colon = diff_start.checked_add_signed(colon_delta * C::UNIT as isize)?;
        if C::read(bytes, colon) != Some(u32::from(':')) {
            continue;
        }

        for nul_delta in [3usize, 6] {
            let nul = colon + nul_delta * C::UNIT;
            if C::read(bytes, nul) != Some(0) {
                continue;
            }
            let Some(start) = nul.checked_sub(8 * C::UNIT) else {
                continue;
            };

            if C::read(bytes, start + 2 * C::UNIT) != Some(u32::from(':'))
                || C::read(bytes, start + 5 * C::UNIT) != Some(u32::from(':'))
            {
                continue;
            }

            let field = |at: usize| -> Option<u32> {
                Some(digit::<C>(bytes, at)? * 10 + digit::<C>(bytes, at + C::UNIT)?)
            };
            let fields = (
                field(start),
                field(start + 3 * C::UNIT),
                field(start + 6 * C::UNIT),
            );
            let (Some(hours), Some(minutes), Some(seconds)) = fields else {
                continue;
            };
            if hours > 23 || minutes > 59 || seconds > 59 {
                continue;
            }

            return Some(nul);
        }
    }
    None
}

/// Claims diffs inside `hh:mm:ss` time literals, consuming through
/// the terminator.
pub fn detect_time_macro(
    first: &FileFacts<'_>,
    second: &FileFacts<'_>,
    start1: usize,
    start2: usize,
    size: usize,
) -> Option<Claim> {
    if size > 2 {
        return None;
    }

    let agree = |nul1: Option<usize>, nul2: Option<usize>| -> Option<usize> {
        let skip1 = nul1?.checked_sub(start1)?;
        let skip2 = nul2?.checked_sub(start2)?;
        (skip1 == skip2).then_some(skip1)
    };

    let skip = agree(
        time_macro_at::<Wide>(first.bytes, start1),
        time_macro_at::<Wide>(second.bytes, start2),
    )
    .or_else(|| {
        agree(
            time_macro_at::<Narrow>(first.bytes, start1),
            time_macro_at::<Narrow>(second.bytes, start2),
        )
    })?;

    Some(Claim {
        description: "__TIME__ macro",
        skip: skip.max(size),
    })
}

// ------------------------------------------------------------------
// __DATE__

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

// Finds the "Mmm dd yyyy" literal overlapping the diff and returns
// the offset just past it.
fn date_macro_at<C: CharSet>(bytes: &[u8], diff_start: usize, diff_size: usize) -> Option<usize> {
    let diff_end = diff_start + diff_size;
    let low = diff_end.saturating_sub(11 * C::UNIT);

    for start in low..diff_end {
        let month_matches = MONTHS.iter().any(|month| {
            month
                .chars()
                .enumerate()
                .all(|(i, c)| C::read(bytes, start + i * C::UNIT) == Some(c as u32))
        });
        if !month_matches {
            continue;
        }

        if C::read(bytes, start + 3 * C::UNIT) != Some(u32::from(' ')) {
            continue;
        }

        // day is space- or zero-padded to two characters
        let day_tens = match C::read(bytes, start + 4 * C::UNIT) {
            Some(unit) if unit == u32::from(' ') => Some(0),
            Some(unit) => char::from_u32(unit).and_then(|c| c.to_digit(10)),
            None => None,
        };
        let day = match (day_tens, digit::<C>(bytes, start + 5 * C::UNIT)) {
            (Some(tens), Some(units)) => tens * 10 + units,
            _ => continue,
        };
        if day == 0 || day > 31 {
            continue;
        }

        if C::read(bytes, start + 6 * C::UNIT) != Some(u32::from(' ')) {
            continue;
        }

        let mut year = 0;
        let mut year_ok = true;
        for i in 0..4 {
            match digit::<C>(bytes, start + (7 + i) * C::UNIT) {
                Some(d) => year = year * 10 + d,
                None => {
                    year_ok = false;
                    break;
                }
            }
        }
        if !year_ok || year < 1970 {
            continue;
        }

        return Some(start + 11 * C::UNIT);
    }
    None
}

/// Claims diffs inside `Mmm dd yyyy` date literals, consuming through
/// the end of the date.
pub fn detect_date_macro(
    first: &FileFacts<'_>,
    second: &FileFacts<'_>,
    start1: usize,
    start2: usize,
    size: usize,
) -> Option<Claim> {
    if size > 4 {
        return None;
    }

    let agree = |end1: Option<usize>, end2: Option<usize>| -> Option<usize> {
        let skip1 = end1?.saturating_sub(start1);
        let skip2 = end2?.saturating_sub(start2);
        (skip1 == skip2).then_some(skip1)
    };

    let skip = agree(
        date_macro_at::<Wide>(first.bytes, start1, size),
        date_macro_at::<Wide>(second.bytes, start2, size),
    )
    .or_else(|| {
        agree(
            date_macro_at::<Narrow>(first.bytes, start1, size),
            date_macro_at::<Narrow>(second.bytes, start2, size),
        )
    })?;

    Some(Claim {
        description: "__DATE__ macro",
        skip: skip.max(size),
    })
}

// ------------------------------------------------------------------
// MIDL type-library stamp

const MIDL_MARKER: &[u8] = b"Created by MIDL version";
// the stamp trails the marker; tested against MIDL 7.00.0555
const MIDL_STAMP_SPAN: usize = 65;

fn midl_stamp_at(facts: &FileFacts<'_>, diff_start: usize) -> bool {
    for block in facts.resource_blocks.iter() {
        if !block.description.contains("@TYPELIB") {
            continue;
        }
        let Some(data) = facts.bytes.get(block.offset..block.offset + block.size) else {
            continue;
        };

        for (i, window) in data.windows(MIDL_MARKER.len()).enumerate() {
            if window != MIDL_MARKER {
                continue;
            }
            let marker = block.offset + i;
            if facts.bytes.get(marker + 61) != Some(&0x0a)
                || facts.bytes.get(marker + 62) != Some(&0x13)
            {
                continue;
            }
            if diff_start >= marker && diff_start < marker + MIDL_STAMP_SPAN {
                return true;
            }
        }
    }
    false
}

/// Claims diffs inside the version stamp MIDL embeds into type
/// libraries.
pub fn detect_midl_stamp(
    first: &FileFacts<'_>,
    second: &FileFacts<'_>,
    start1: usize,
    start2: usize,
    size: usize,
) -> Option<Claim> {
    if midl_stamp_at(first, start1) && midl_stamp_at(second, start2) {
        Some(Claim {
            description: "MIDL timestamp",
            skip: size,
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, BlockList};

    fn facts<'a>(bytes: &'a [u8], pdb: &'a str, blocks: &'a BlockList) -> FileFacts<'a> {
        FileFacts {
            bytes,
            pdb_path: pdb,
            resource_blocks: blocks,
        }
    }

    fn narrow_time(text: &str) -> Vec<u8> {
        let mut bytes = b"....".to_vec();
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(b"....");
        bytes
    }

    #[test]
    fn time_macro_narrow() {
        let empty = BlockList::default();
        let one = narrow_time("12:34:56");
        let two = narrow_time("12:35:11");
        // minutes digit at offset 4 + 4
        let f1 = facts(&one, "", &empty);
        let f2 = facts(&two, "", &empty);
        let claim = detect_time_macro(&f1, &f2, 8, 8, 1).expect("claimed");
        assert_eq!(claim.description, "__TIME__ macro");
        // NUL sits at offset 12, 4 bytes past the diff start
        assert_eq!(claim.skip, 4);

        // out-of-range hours are rejected
        let bad1 = narrow_time("25:34:56");
        let bad2 = narrow_time("25:35:11");
        let f1 = facts(&bad1, "", &empty);
        let f2 = facts(&bad2, "", &empty);
        assert!(detect_time_macro(&f1, &f2, 8, 8, 1).is_none());
    }

    #[test]
    fn time_macro_wide() {
        let empty = BlockList::default();
        let widen = |text: &str| -> Vec<u8> {
            let mut bytes = Vec::new();
            for unit in text.encode_utf16() {
                bytes.extend_from_slice(&unit.to_le_bytes());
            }
            bytes.extend_from_slice(&[0, 0]);
            bytes
        };
        let one = widen("07:00:00");
        let two = widen("07:30:00");
        let f1 = facts(&one, "", &empty);
        let f2 = facts(&two, "", &empty);
        // minutes tens digit is character 3 -> byte offset 6
        let claim = detect_time_macro(&f1, &f2, 6, 6, 2).expect("claimed");
        assert_eq!(claim.skip, 10);
    }

    #[test]
    fn date_macro() {
        let empty = BlockList::default();
        let one = b"..Jul 30 2025..".to_vec();
        let two = b"..Jul 31 2025..".to_vec();
        // day units digit differs at offset 7
        let f1 = facts(&one, "", &empty);
        let f2 = facts(&two, "", &empty);
        let claim = detect_date_macro(&f1, &f2, 7, 7, 1).expect("claimed");
        assert_eq!(claim.description, "__DATE__ macro");
        // date ends at offset 13
        assert_eq!(claim.skip, 6);

        let junk = b"..Xul 30 2025..".to_vec();
        let f1 = facts(&junk, "", &empty);
        let f2 = facts(&two, "", &empty);
        assert!(detect_date_macro(&f1, &f2, 7, 7, 1).is_none());
    }

    #[test]
    fn file_macro() {
        let empty = BlockList::default();
        let one = b"..C:\\build\\src\\alpha.cpp\0..".to_vec();
        let two = b"..c:/build/src/bravo.cpp\0..".to_vec();
        let f1 = facts(&one, "C:\\build\\out\\app.pdb", &empty);
        let f2 = facts(&two, "C:\\build\\out\\app.pdb", &empty);
        // file names differ starting at offset 15
        let claim = detect_file_macro(&f1, &f2, 15, 15, 5).expect("claimed");
        assert_eq!(claim.description, "__FILE__ macro");
        assert_eq!(claim.skip, 5);

        // different PDB path lengths make the diff unclaimable
        let f2 = facts(&two, "C:\\b\\app.pdb", &empty);
        assert!(detect_file_macro(&f1, &f2, 15, 15, 5).is_none());

        // no path anywhere near the diff
        let blank = vec![0u8; 64];
        let f1 = facts(&blank, "C:\\build\\out\\app.pdb", &empty);
        let f2 = facts(&blank, "C:\\build\\out\\app.pdb", &empty);
        assert!(detect_file_macro(&f1, &f2, 40, 40, 5).is_none());
    }

    #[test]
    fn midl_stamp() {
        let make = |stamp: u8| -> (Vec<u8>, BlockList) {
            let mut bytes = vec![0u8; 16];
            bytes.extend_from_slice(MIDL_MARKER);
            bytes.resize(16 + 61, b' ');
            bytes.push(0x0a);
            bytes.push(0x13);
            bytes.resize(16 + 90, stamp);
            let mut blocks = BlockList::default();
            blocks.push(Block::new("Resource: @TYPELIB/1/0", 16, 90 - 16));
            (bytes, blocks)
        };
        let (one, blocks1) = make(0x11);
        let (two, blocks2) = make(0x22);
        let f1 = facts(&one, "", &blocks1);
        let f2 = facts(&two, "", &blocks2);

        // stamp bytes differ 40..48 past the marker
        assert!(detect_midl_stamp(&f1, &f2, 16 + 40, 16 + 40, 8).is_some());
        assert!(filter_difference(&f1, &f2, 16 + 40, 16 + 40, 8, true).is_some());
        assert!(filter_difference(&f1, &f2, 16 + 40, 16 + 40, 8, false).is_none());

        // past the stamp span
        assert!(detect_midl_stamp(&f1, &f2, 16 + 70, 16 + 70, 8).is_none());
    }
}
