use crate::block::{Block, Block2, BlockNode};
use crate::heuristics::{filter_difference, FileFacts};
use crate::pe::PeReader;
use log::debug;
use std::io::{self, Write};

/// Flags that shape a comparison.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompareOptions {
    /// Window-at-a-time comparison; stops at the first difference and
    /// computes no percentage.
    pub fast: bool,
    /// Do not try to interpret differences at unknown offsets.
    pub no_heuristics: bool,
    /// Collect the nested block tree for the report.
    pub verbose: bool,
    /// Enable the experimental MIDL type-library stamp detector.
    pub tlb_timestamp: bool,
}

/// Describes a PE comparison result.
#[derive(Default)]
pub struct CompareResult {
    identical: bool,
    equivalent: bool,
    different_path: bool,
    different_path_length: bool,
    different_compiler: bool,
    wrong_format: bool,
    different_size: bool,
    error: bool,
    fast: bool,
    verbose: bool,
    corrupted: bool,

    same: u64,
    different: u64,

    first_difference: Option<Block2>,
    diffs: Vec<Block2>,
    dynamic_ignored: Vec<Block2>,
    tree: Option<BlockNode>,
}

impl CompareResult {
    /// A result for a comparison that could not run at all.
    pub fn error_result() -> Self {
        Self {
            error: true,
            ..Self::default()
        }
    }

    /// Compared files are byte-for-byte identical.
    pub fn is_identical(&self) -> bool {
        self.identical
    }

    /// Compared files have differences, but they are all superficial.
    pub fn is_equivalent(&self) -> bool {
        self.equivalent
    }

    /// The comparison could not run.
    pub fn is_error(&self) -> bool {
        self.error
    }

    /// One of the files is not a PE binary.
    pub fn is_wrong_format(&self) -> bool {
        self.wrong_format
    }

    /// One of the files failed to parse.
    pub fn is_corrupted(&self) -> bool {
        self.corrupted
    }

    /// The files embed different PDB paths.
    pub fn is_different_path(&self) -> bool {
        self.different_path
    }

    /// The PDB paths differ in length. Full compilation paths shift
    /// compiler memory layout and often cause big shifts in generated
    /// machine code; comparison is often hopeless then.
    pub fn is_different_path_length(&self) -> bool {
        self.different_path_length
    }

    /// The linker versions differ.
    pub fn is_different_compiler(&self) -> bool {
        self.different_compiler
    }

    /// The effective (ignored-range-corrected) sizes differ.
    pub fn is_different_size(&self) -> bool {
        self.different_size
    }

    /// Share of compared bytes that differ, in percent. Fast-mode
    /// results report 100 when any difference was found.
    pub fn percent_different(&self) -> f64 {
        if self.fast {
            return if self.identical || self.equivalent {
                0.0
            } else {
                100.0
            };
        }
        if self.different == 0 {
            return 0.0;
        }
        100.0 * self.different as f64 / (self.same + self.different) as f64
    }

    /// Number of differing bytes (full mode only).
    pub fn different_bytes(&self) -> u64 {
        self.different
    }

    /// Writes the plain-text report.
    pub fn write_report<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        if self.identical {
            writeln!(out, "Identical.")?;
        } else if self.equivalent {
            writeln!(out, "Functionally equivalent.")?;
        } else {
            writeln!(out, "Not equivalent.")?;
        }

        if self.error {
            writeln!(out, "  * failed to open one of the files")?;
        }
        if self.wrong_format {
            writeln!(out, "  * one of the files is not a valid PE binary")?;
        }
        if self.corrupted {
            writeln!(out, "  * one of the files is corrupted")?;
        }
        if self.different_size {
            writeln!(out, "  * different size")?;
        }
        if self.different_path_length {
            writeln!(out, "  * different PDB path length")?;
        }
        if self.different_path {
            writeln!(out, "  * different PDB path")?;
        }
        if self.different_compiler {
            writeln!(out, "  * different linker version")?;
        }
        if let Some(first) = &self.first_difference {
            writeln!(out, "  * {first}")?;
        }

        if !self.fast && !self.identical && !self.error && !self.wrong_format {
            writeln!(
                out,
                "Difference: {:.2}% ({} bytes)",
                self.percent_different(),
                self.different
            )?;
        }

        if self.verbose {
            if !self.dynamic_ignored.is_empty() {
                writeln!(out, "Dynamically ignored ranges:")?;
                for block in &self.dynamic_ignored {
                    writeln!(out, "\t{block}")?;
                }
            }
            if let Some(tree) = &self.tree {
                writeln!(out)?;
                write!(out, "{tree}")?;
            }
        }

        Ok(())
    }
}

fn hex_preview(bytes: &[u8], offset: usize, size: usize) -> String {
    let end = (offset + size.min(16)).min(bytes.len());
    bytes
        .get(offset..end)
        .unwrap_or_default()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

// Walks a sorted ignored list: entering an ignored block jumps past
// it, and the returned span runs to the next ignored block or `max`.
fn next_offset(ignored: &[Block], mut offset: usize, max: usize) -> (usize, usize) {
    loop {
        let mut moved = false;
        for block in ignored {
            if block.size == 0 {
                continue;
            }
            if block.offset > offset {
                break;
            }
            if offset < block.offset + block.size {
                offset = block.offset + block.size;
                moved = true;
            }
        }
        if !moved {
            break;
        }
    }

    if offset >= max {
        return (offset, 0);
    }

    let mut end = max;
    for block in ignored {
        if block.size == 0 {
            continue;
        }
        if block.offset > offset {
            end = end.min(block.offset);
            break;
        }
    }

    (offset, end - offset)
}

/// Compares two opened binaries.
///
/// Known linker-generated ranges (and any manually added ones) are
/// skipped in lock-step; in full mode the remaining differences run
/// through the heuristics before they count against equivalence.
pub fn compare(first: &PeReader, second: &PeReader, options: CompareOptions) -> CompareResult {
    let mut result = CompareResult {
        fast: options.fast,
        verbose: options.verbose,
        ..CompareResult::default()
    };

    let bytes1 = first.bytes();
    let bytes2 = second.bytes();

    // bit-identical files need no parsing at all
    if bytes1 == bytes2 {
        result.identical = true;
        result.equivalent = true;
        return result;
    }

    if !first.is_valid_pe() || !second.is_valid_pe() {
        result.wrong_format = true;
        result.corrupted = first.is_corrupted() || second.is_corrupted();
        return result;
    }

    if first.pdb_path().len() != second.pdb_path().len() {
        result.different_path_length = true;
        result.different_path = true;
    } else if !first.pdb_path().eq_ignore_ascii_case(second.pdb_path()) {
        result.different_path = true;
    }
    if first.linker_version() != second.linker_version() {
        result.different_compiler = true;
    }

    let mut ignored1 = first.ignored().clone();
    let mut ignored2 = second.ignored().clone();
    ignored1.sort();
    ignored2.sort();

    let effective1 = bytes1.len() as i64 - ignored1.total_size() as i64;
    let effective2 = bytes2.len() as i64 - ignored2.total_size() as i64;
    if effective1 != effective2 {
        result.different_size = true;
        return result;
    }

    let facts1 = FileFacts {
        bytes: bytes1,
        pdb_path: first.pdb_path(),
        resource_blocks: first.resource_blocks(),
    };
    let facts2 = FileFacts {
        bytes: bytes2,
        pdb_path: second.pdb_path(),
        resource_blocks: second.resource_blocks(),
    };

    let mut offset1 = 0usize;
    let mut offset2 = 0usize;
    let mut clean = true;

    loop {
        let (start1, span1) = next_offset(&ignored1.0, offset1, bytes1.len());
        let (start2, span2) = next_offset(&ignored2.0, offset2, bytes2.len());
        let span = span1.min(span2);

        if span == 0 {
            if span1 != span2 {
                // one file ran out early; sizes said this cannot happen
                debug!("compare windows desynchronized at {start1:#x}/{start2:#x}");
                result.different_size = true;
                clean = false;
            }
            break;
        }

        if options.fast {
            if bytes1[start1..start1 + span] != bytes2[start2..start2 + span] {
                let mut block = Block2::new("First different block", start1, start2, span);
                block.data = hex_preview(bytes1, start1, span);
                block.data2 = hex_preview(bytes2, start2, span);
                result.first_difference = Some(block);
                clean = false;
                break;
            }
            offset1 = start1 + span;
            offset2 = start2 + span;
            continue;
        }

        let mut i = 0usize;
        let mut diff_start: Option<usize> = None;

        while i <= span {
            let differs = i < span && bytes1[start1 + i] != bytes2[start2 + i];

            if differs {
                if diff_start.is_none() {
                    diff_start = Some(i);
                }
                i += 1;
                continue;
            }

            if let Some(begin) = diff_start.take() {
                let diff_size = i - begin;
                let claim = if options.no_heuristics {
                    None
                } else {
                    filter_difference(
                        &facts1,
                        &facts2,
                        start1 + begin,
                        start2 + begin,
                        diff_size,
                        options.tlb_timestamp,
                    )
                };

                match claim {
                    Some(claim) => {
                        let consumed = claim.skip.clamp(diff_size, span - begin);
                        result.same += consumed as u64;
                        let mut block =
                            Block2::new(claim.description, start1 + begin, start2 + begin, consumed);
                        block.data = hex_preview(bytes1, start1 + begin, consumed);
                        block.data2 = hex_preview(bytes2, start2 + begin, consumed);
                        result.dynamic_ignored.push(block);
                        i = begin + consumed;
                        continue;
                    }
                    None => {
                        result.different += diff_size as u64;
                        let mut block =
                            Block2::new("Difference", start1 + begin, start2 + begin, diff_size);
                        block.data = hex_preview(bytes1, start1 + begin, diff_size);
                        block.data2 = hex_preview(bytes2, start2 + begin, diff_size);
                        if result.first_difference.is_none() {
                            let mut first = block.clone();
                            first.description = "First difference".to_string();
                            result.first_difference = Some(first);
                        }
                        result.diffs.push(block);
                    }
                }
            }

            if i < span {
                result.same += 1;
            }
            i += 1;
        }

        offset1 = start1 + span;
        offset2 = start2 + span;
    }

    if !options.fast {
        clean = clean && result.different == 0;
    }
    result.equivalent = clean;

    if options.verbose {
        let mut tree = BlockNode::new(Block2::new(
            "whole file",
            0,
            0,
            bytes1.len().max(bytes2.len()),
        ));
        tree.add_list(first.interesting());
        tree.add_list2(&result.dynamic_ignored);
        tree.add_list2(&result.diffs);
        tree.sort();
        result.tree = Some(tree);
    }

    result
}
