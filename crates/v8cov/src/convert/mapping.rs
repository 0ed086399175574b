//! Generated → original positions, and per-file accumulation.

use super::lines::LineIndex;
use super::visitor::ByteSpan;
use crate::istanbul::{BranchMapping, BranchType, FileCoverage, FunctionMapping, Location, Position};
use crate::source_map::normalize_source_path;
use std::collections::HashMap;

/// Translates byte spans of the parsed code into original locations
pub(super) struct PositionMapper<'a> {
    lines: &'a LineIndex<'a>,
    map: Option<::sourcemap::SourceMap>,
    fallback_path: &'a str,
    normalized: HashMap<String, Option<String>>,
}

impl<'a> PositionMapper<'a> {
    pub(super) fn new(
        lines: &'a LineIndex<'a>,
        map: Option<::sourcemap::SourceMap>,
        fallback_path: &'a str,
    ) -> Self {
        Self {
            lines,
            map,
            fallback_path,
            normalized: HashMap::new(),
        }
    }

    /// Original path and location of `span`, `None` when unmapped
    pub(super) fn locate(&mut self, span: ByteSpan) -> Option<(String, Location)> {
        let (start_line, start_col) = self.lines.position(span.lo);
        let (end_line, end_col) = self.lines.position(span.hi);

        let Some(map) = &self.map else {
            let loc = Location::new(
                Position::new(start_line + 1, start_col),
                Position::new(end_line + 1, end_col),
            );
            return Some((self.fallback_path.to_string(), loc));
        };

        let (source, start) = original(map, start_line, start_col)?;
        let end = original(map, end_line, end_col)
            .filter(|(end_source, end)| *end_source == source && *end >= start)
            .map_or(start, |(_, end)| end);

        let path = match self.normalized.get(&source) {
            Some(cached) => cached.clone(),
            None => {
                let path = normalize_source_path(&source);
                self.normalized.insert(source, path.clone());
                path
            }
        }?;
        Some((path, Location::new(start, end)))
    }
}

/// Source and position of the token covering a generated position on its line
fn original(map: &::sourcemap::SourceMap, line: u32, col: u32) -> Option<(String, Position)> {
    let token = map.lookup_token(line, col)?;
    if token.get_dst_line() != line {
        return None;
    }
    let source = token.get_source()?.to_string();
    let column = token.get_src_col() + col.saturating_sub(token.get_dst_col());
    Some((source, Position::new(token.get_src_line() + 1, column)))
}

type StatementKey = (usize, Location);
type BranchKey = (usize, Location, BranchType);

/// Accumulates deduplicated constructs into one `FileCoverage` per path
#[derive(Debug, Default)]
pub(super) struct FileBuilder {
    files: Vec<FileCoverage>,
    by_path: HashMap<String, usize>,
    statements: HashMap<StatementKey, u32>,
    functions: HashMap<StatementKey, u32>,
    branches: HashMap<BranchKey, u32>,
}

impl FileBuilder {
    fn file(&mut self, path: &str) -> usize {
        if let Some(&idx) = self.by_path.get(path) {
            return idx;
        }
        self.files.push(FileCoverage::new(path));
        self.by_path.insert(path.to_string(), self.files.len() - 1);
        self.files.len() - 1
    }

    pub(super) fn statement(&mut self, path: &str, loc: Location, count: u64) {
        let idx = self.file(path);
        let file = &mut self.files[idx];
        match self.statements.get(&(idx, loc)) {
            Some(id) => keep_max(file.s.get_mut(id), count),
            None => {
                let id = file.add_statement(loc, count);
                self.statements.insert((idx, loc), id);
            }
        }
    }

    pub(super) fn function(
        &mut self,
        path: &str,
        name: Option<String>,
        decl: Location,
        loc: Location,
        count: u64,
    ) {
        let idx = self.file(path);
        let file = &mut self.files[idx];
        if let Some(id) = self.functions.get(&(idx, loc)) {
            keep_max(file.f.get_mut(id), count);
            return;
        }
        let name = name.unwrap_or_else(|| format!("(anonymous_{})", file.fn_map.len()));
        let mapping = FunctionMapping {
            name,
            decl,
            loc,
            line: loc.start.line,
        };
        let id = file.add_function(mapping, count);
        self.functions.insert((idx, loc), id);
    }

    pub(super) fn branch(
        &mut self,
        path: &str,
        kind: BranchType,
        loc: Location,
        arms: Vec<(Location, u64)>,
    ) {
        let idx = self.file(path);
        let file = &mut self.files[idx];
        let (locations, counts): (Vec<_>, Vec<_>) = arms.into_iter().unzip();
        if let Some(id) = self.branches.get(&(idx, loc, kind)) {
            if let Some(existing) = file.b.get_mut(id) {
                for (slot, count) in existing.iter_mut().zip(counts) {
                    *slot = (*slot).max(count);
                }
            }
            return;
        }
        let mapping = BranchMapping {
            loc,
            branch_type: kind,
            locations,
            line: loc.start.line,
        };
        let id = file.add_branch(mapping, counts);
        self.branches.insert((idx, loc, kind), id);
    }

    pub(super) fn finish(self) -> Vec<FileCoverage> {
        self.files
    }
}

fn keep_max(slot: Option<&mut u64>, count: u64) {
    if let Some(slot) = slot {
        *slot = (*slot).max(count);
    }
}
